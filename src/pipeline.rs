//! The batch driver: sequencing the pipeline across a scan directory.
//!
//! Scans are processed strictly sequentially. For every configured quadrant
//! of every scan the driver runs split, rotation correction, margin
//! cropping, canonical fitting and box recognition, then persists one JSON
//! file and one annotated preview per recognized sheet. Existing outputs are
//! never overwritten: a colliding sheet identity is reassigned to the
//! fallback identity instead. Cancellation is cooperative, checked once per
//! scan.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::core::config::PipelineConfig;
use crate::core::errors::ScanError;
use crate::recognize::{BoxRecognizer, FallbackIdentity, OcrClient};
use crate::steps::{
    CanonicalFitter, MarginFinder, QuadrantSplitter, RotationCorrector, SplitResult,
};
use crate::template::{BoxRole, RecognizedSheet, SheetTemplate};
use crate::vocabulary::{format_page_number, Vocabularies};

/// Cooperative cancellation flag shared with the embedding application.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What one batch run produced.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub scans_processed: usize,
    /// Output keys of every written sheet, in processing order.
    pub sheets_written: Vec<String>,
    pub empty_quadrants: usize,
    /// Scans that yielded fewer sheets than configured quadrants.
    pub partial_scans: Vec<PathBuf>,
    pub aborted: bool,
}

/// Drives the full pipeline over a directory of raw scans.
pub struct BatchDriver<'a> {
    config: &'a PipelineConfig,
    template: &'a SheetTemplate,
    vocabularies: &'a Vocabularies,
    fallback_name: String,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        template: &'a SheetTemplate,
        vocabularies: &'a Vocabularies,
        fallback_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            template,
            vocabularies,
            fallback_name: fallback_name.into(),
        }
    }

    /// Processes every scan under `scan_dir`, writing sheet files and
    /// previews to `out_dir` and step artifacts to `debug_dir` when given.
    pub fn run(
        &self,
        scan_dir: &Path,
        out_dir: &Path,
        debug_dir: Option<&Path>,
        ocr: &mut OcrClient,
        abort: &AbortFlag,
    ) -> Result<BatchSummary, ScanError> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| ScanError::io(format!("creating output dir {}", out_dir.display()), e))?;
        if let Some(dir) = debug_dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| ScanError::io(format!("creating debug dir {}", dir.display()), e))?;
        }

        let scans = list_scan_files(scan_dir)?;
        info!(scans = scans.len(), dir = %scan_dir.display(), "starting batch");

        let splitter = QuadrantSplitter::new(self.config.split);
        let corrector = RotationCorrector::new(self.config.rotate);
        let finder = MarginFinder::new(self.config.margins);
        let fitter = CanonicalFitter::new(self.template);
        let recognizer =
            BoxRecognizer::new(self.template, self.vocabularies, &self.config.recognize);

        let mut summary = BatchSummary::default();
        let mut fallback_page: u32 = 1;
        for scan_path in &scans {
            if abort.is_aborted() {
                warn!("abort requested, stopping batch");
                summary.aborted = true;
                break;
            }
            let stem = scan_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "scan".into());
            info!(scan = %stem, "processing scan");

            let scan = self.load_oriented_scan(scan_path)?;
            let outcomes = splitter.split_scan(&scan, &self.config.scan.quadrants);

            let mut sheets_from_scan = 0usize;
            for outcome in outcomes {
                let prefix = format!("{stem}_q{}", outcome.index);
                if let Some(dir) = debug_dir {
                    outcome.diagnostics.save_all(dir, &format!("{prefix}_split"))?;
                }
                let SplitResult::Sheet { sheet, .. } = outcome.result else {
                    summary.empty_quadrants += 1;
                    continue;
                };

                let rotated = corrector.correct(&sheet);
                let cropped = finder.crop(&rotated.image);
                let canonical = fitter.fit(&cropped.image);
                if let Some(dir) = debug_dir {
                    rotated.diagnostics.save_all(dir, &format!("{prefix}_rotate"))?;
                    cropped.diagnostics.save_all(dir, &format!("{prefix}_margins"))?;
                }

                let fallback = FallbackIdentity {
                    name: self.fallback_name.clone(),
                    page: fallback_page,
                };
                fallback_page += 1;

                let mut recognized =
                    recognizer.recognize_sheet(&canonical.image, ocr, &fallback)?;
                let key = self.persist_sheet(
                    &mut recognized,
                    &canonical.image,
                    out_dir,
                    &mut fallback_page,
                )?;
                info!(sheet = %key, "sheet written");
                summary.sheets_written.push(key);
                sheets_from_scan += 1;
            }

            if sheets_from_scan < self.config.scan.quadrants.len() {
                summary.partial_scans.push(scan_path.clone());
            }
            summary.scans_processed += 1;
        }

        info!(
            scans = summary.scans_processed,
            sheets = summary.sheets_written.len(),
            empty_quadrants = summary.empty_quadrants,
            partial = summary.partial_scans.len(),
            aborted = summary.aborted,
            "batch finished"
        );
        Ok(summary)
    }

    /// Loads a scan, applies the configured quarter-turn rotation, and
    /// resizes to the target resolution.
    fn load_oriented_scan(&self, path: &Path) -> Result<RgbImage, ScanError> {
        let image = image::open(path)?.to_rgb8();
        let oriented = match self.config.scan.rotation_quarter_turns % 4 {
            1 => imageops::rotate90(&image),
            2 => imageops::rotate180(&image),
            3 => imageops::rotate270(&image),
            _ => image,
        };
        debug!(
            width = oriented.width(),
            height = oriented.height(),
            "scan loaded"
        );
        Ok(imageops::resize(
            &oriented,
            self.config.scan.target_width,
            self.config.scan.target_height,
            FilterType::CatmullRom,
        ))
    }

    /// Writes the sheet JSON and preview, reassigning to the fallback
    /// identity first when an output with the same key already exists.
    fn persist_sheet(
        &self,
        sheet: &mut RecognizedSheet,
        canonical: &RgbImage,
        out_dir: &Path,
        fallback_page: &mut u32,
    ) -> Result<String, ScanError> {
        if out_dir.join(format!("{}.json", sheet.key())).exists() {
            warn!(
                key = %sheet.key(),
                "output already exists, reassigning sheet to fallback identity"
            );
            loop {
                self.reassign_to_fallback(sheet, *fallback_page);
                *fallback_page += 1;
                if !out_dir.join(format!("{}.json", sheet.key())).exists() {
                    break;
                }
            }
        }

        let key = sheet.key();
        let json_path = out_dir.join(format!("{key}.json"));
        let payload = serde_json::to_string_pretty(sheet)?;
        std::fs::write(&json_path, payload)
            .map_err(|e| ScanError::io(format!("writing {}", json_path.display()), e))?;

        let preview = render_preview(canonical, sheet, self.template);
        preview.save(out_dir.join(format!("{key}.png")))?;
        Ok(key)
    }

    fn reassign_to_fallback(&self, sheet: &mut RecognizedSheet, page: u32) {
        let page_text = format_page_number(&self.config.recognize.page_number_format, page);
        for b in &mut sheet.boxes {
            match b.role {
                BoxRole::Name => {
                    b.text = self.fallback_name.to_uppercase();
                    b.confidence = 0.0;
                    b.flagged = true;
                }
                BoxRole::PageNumber => {
                    b.text = page_text.clone();
                    b.confidence = 0.0;
                    b.flagged = true;
                }
                _ => {}
            }
        }
        sheet.product_id = crate::template::product_id_from_name(&self.fallback_name);
        sheet.page_number = page_text;
    }
}

/// Renders the canonical sheet with box outlines; flagged boxes are tinted
/// and outlined in red, everything else in green.
pub fn render_preview(
    canonical: &RgbImage,
    sheet: &RecognizedSheet,
    template: &SheetTemplate,
) -> RgbImage {
    let mut preview = canonical.clone();
    for spec in template.boxes() {
        let flagged = sheet
            .boxes
            .iter()
            .find(|b| b.name == spec.name)
            .is_some_and(|b| b.flagged);
        if flagged {
            for y in spec.rect.y0..spec.rect.y1 {
                for x in spec.rect.x0..spec.rect.x1 {
                    let p = preview.get_pixel_mut(x, y);
                    p.0 = [
                        ((p.0[0] as u16 + 255) / 2) as u8,
                        (p.0[1] / 2),
                        (p.0[2] / 2),
                    ];
                }
            }
        }
        let color = if flagged {
            Rgb([200, 0, 0])
        } else {
            Rgb([0, 160, 0])
        };
        draw_hollow_rect_mut(
            &mut preview,
            Rect::at(spec.rect.x0 as i32, spec.rect.y0 as i32)
                .of_size(spec.rect.width().max(1), spec.rect.height().max(1)),
            color,
        );
    }
    preview
}

/// Scan files in deterministic order.
fn list_scan_files(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ScanError::io(format!("reading scan dir {}", dir.display()), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| ScanError::io(format!("reading scan dir {}", dir.display()), e))?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                matches!(
                    e.to_ascii_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "tif" | "tiff" | "bmp"
                )
            });
        if is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
