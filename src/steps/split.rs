//! Quadrant splitting: cutting a raw scan into per-sheet images.
//!
//! Each configured quadrant is cropped out of the scan and its physical
//! sheet is isolated from the scan background. Foreground extraction runs a
//! two-stage strategy: an adaptive-threshold morphology chain first, falling
//! back to global Otsu thresholding when the adaptive chain finds nothing.
//! The largest foreground component becomes the sheet mask; its minimum-area
//! rotated rectangle is deskewed and extracted with sub-pixel accuracy.

use image::{GrayImage, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::median_filter;
use tracing::{debug, warn};

use crate::components::label_components;
use crate::core::config::{RelRect, SplitConfig};
use crate::geometry::{min_area_rect, Point};
use crate::imgutil;
use crate::morph::{self, RectKernel};
use crate::steps::Diagnostics;

/// The outcome for one quadrant of a scan.
#[derive(Debug)]
pub enum SplitResult {
    /// No sheet present; the quadrant is skipped entirely.
    Empty,
    /// A sheet was isolated.
    Sheet {
        /// The deskewed, tightly cropped sheet image.
        sheet: RgbImage,
        /// The untouched quadrant crop, kept for review tooling.
        original: RgbImage,
    },
}

/// One quadrant's result together with its diagnostics.
#[derive(Debug)]
pub struct SplitOutcome {
    /// Index into the configured quadrant list.
    pub index: usize,
    pub result: SplitResult,
    pub diagnostics: Diagnostics,
}

/// Splits raw scans into per-quadrant sheet images.
#[derive(Debug)]
pub struct QuadrantSplitter {
    config: SplitConfig,
    small: RectKernel,
    medium: RectKernel,
    big: RectKernel,
}

impl QuadrantSplitter {
    pub fn new(config: SplitConfig) -> Self {
        let k = config.kernel_size;
        Self {
            config,
            small: RectKernel::square(k),
            medium: RectKernel::new(5 * k, 4 * k),
            big: RectKernel::new(10 * k, 8 * k),
        }
    }

    /// Splits one oriented, resized scan into its configured quadrants.
    pub fn split_scan(&self, scan: &RgbImage, quadrants: &[RelRect]) -> Vec<SplitOutcome> {
        quadrants
            .iter()
            .enumerate()
            .map(|(index, rel)| {
                let (x, y, w, h) = rel.to_pixels(scan.width(), scan.height());
                let quadrant = imgutil::crop(scan, x, y, w, h);
                let (result, diagnostics) = self.split_quadrant(&quadrant);
                debug!(
                    quadrant = index,
                    empty = matches!(result, SplitResult::Empty),
                    "quadrant split"
                );
                SplitOutcome {
                    index,
                    result,
                    diagnostics,
                }
            })
            .collect()
    }

    /// Isolates the sheet within one quadrant crop.
    pub fn split_quadrant(&self, quadrant: &RgbImage) -> (SplitResult, Diagnostics) {
        let mut diagnostics = Diagnostics::default();
        let gray = imgutil::to_gray(quadrant);
        let mask = self.foreground_mask(&gray, &mut diagnostics);
        let result = self.sheet_from_mask(quadrant, &mask, &mut diagnostics);
        (result, diagnostics)
    }

    /// Two-stage foreground extraction.
    ///
    /// Primary: median blur, adaptive threshold, small erosion, medium
    /// dilation, large erosion, inversion. When that leaves no foreground
    /// component at all, fall back to a global Otsu threshold with the same
    /// erosion/dilation ladder (uninverted).
    fn foreground_mask(&self, gray: &GrayImage, diagnostics: &mut Diagnostics) -> GrayImage {
        let blurred = median_filter(gray, 3, 3);
        let binary = imgutil::adaptive_mean_threshold(&blurred, 5, 2);
        diagnostics.record_gray("adaptive_threshold", binary.clone());

        let mut mask = morph::erode(&binary, self.small);
        mask = morph::dilate(&mask, self.medium);
        mask = morph::erode(&mask, self.big);
        morph::invert(&mut mask);
        diagnostics.record_gray("adaptive_mask", mask.clone());

        if label_components(&mask).components.is_empty() {
            debug!("adaptive foreground extraction empty, falling back to otsu");
            let level = otsu_level(&blurred);
            let binary = threshold(&blurred, level, ThresholdType::Binary);
            diagnostics.record_gray("otsu_threshold", binary.clone());

            mask = morph::erode(&binary, self.small);
            mask = morph::dilate(&mask, self.medium);
            mask = morph::erode(&mask, self.big);
            diagnostics.record_gray("otsu_mask", mask.clone());
        }
        mask
    }

    /// Selects the largest foreground component, checks coverage, and
    /// deskews its minimum-area rectangle out of the quadrant.
    fn sheet_from_mask(
        &self,
        quadrant: &RgbImage,
        mask: &GrayImage,
        diagnostics: &mut Diagnostics,
    ) -> SplitResult {
        let labeled = label_components(mask);
        let Some(largest) = labeled.components.first() else {
            debug!("no foreground component, quadrant empty");
            return SplitResult::Empty;
        };

        let quadrant_area = quadrant.width() as f32 * quadrant.height() as f32;
        let coverage = largest.area as f32 / quadrant_area;
        if coverage < self.config.min_coverage {
            debug!(coverage, "foreground below coverage threshold, quadrant empty");
            return SplitResult::Empty;
        }

        let sheet_mask = labeled.component_mask(largest.label);
        diagnostics.record_gray("sheet_mask", sheet_mask.clone());

        let points: Vec<Point> = sheet_mask
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != 0)
            .map(|(x, y, _)| Point::new(x as f32, y as f32))
            .collect();
        let Some(rect) = min_area_rect(&points) else {
            warn!("degenerate sheet mask, quadrant treated as empty");
            return SplitResult::Empty;
        };
        let rect = rect.normalized();
        debug!(
            angle_deg = rect.angle_deg,
            width = rect.width,
            height = rect.height,
            "sheet rectangle"
        );

        let rotated = imgutil::rotate_about(quadrant, rect.center, rect.angle_deg);
        let sheet = imgutil::rect_subpix(
            &rotated,
            rect.center,
            rect.width.round() as u32,
            rect.height.round() as u32,
        );
        diagnostics.record_rgb("sheet", sheet.clone());

        SplitResult::Sheet {
            sheet,
            original: quadrant.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn splitter() -> QuadrantSplitter {
        QuadrantSplitter::new(SplitConfig::default())
    }

    fn mask_with_rect(w: u32, h: u32, x0: u32, y0: u32, rw: u32, rh: u32) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for y in y0..y0 + rh {
            for x in x0..x0 + rw {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn test_low_coverage_mask_marks_quadrant_empty() {
        let quadrant = RgbImage::from_pixel(100, 100, Rgb([30, 30, 30]));
        let mask = mask_with_rect(100, 100, 10, 10, 20, 20);
        let mut diagnostics = Diagnostics::default();
        let result = splitter().sheet_from_mask(&quadrant, &mask, &mut diagnostics);
        assert!(matches!(result, SplitResult::Empty));
    }

    #[test]
    fn test_axis_aligned_mask_extracts_rect() {
        let quadrant = RgbImage::from_pixel(200, 200, Rgb([200, 200, 200]));
        let mask = mask_with_rect(200, 200, 30, 40, 140, 110);
        let mut diagnostics = Diagnostics::default();
        let result = splitter().sheet_from_mask(&quadrant, &mask, &mut diagnostics);
        let SplitResult::Sheet { sheet, original } = result else {
            panic!("expected sheet");
        };
        assert_eq!(original.dimensions(), (200, 200));
        let (w, h) = sheet.dimensions();
        assert!((w as i64 - 140).abs() <= 2, "width {w}");
        assert!((h as i64 - 110).abs() <= 2, "height {h}");
    }

    #[test]
    fn test_tilted_mask_is_deskewed() {
        // Filled rectangle 160x90 tilted by 8 degrees around the center.
        let (cx, cy) = (100.0f32, 100.0f32);
        let theta = 8.0f32.to_radians();
        let (sin, cos) = theta.sin_cos();
        let mut mask = GrayImage::new(200, 200);
        for y in 0..200u32 {
            for x in 0..200u32 {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                if u.abs() <= 80.0 && v.abs() <= 45.0 {
                    mask.put_pixel(x, y, image::Luma([255]));
                }
            }
        }
        let quadrant = RgbImage::from_pixel(200, 200, Rgb([180, 180, 180]));
        let mut diagnostics = Diagnostics::default();
        let result = splitter().sheet_from_mask(&quadrant, &mask, &mut diagnostics);
        let SplitResult::Sheet { sheet, .. } = result else {
            panic!("expected sheet");
        };
        let (w, h) = sheet.dimensions();
        assert!((w as i64 - 161).abs() <= 3, "width {w}");
        assert!((h as i64 - 91).abs() <= 3, "height {h}");
    }

    #[test]
    fn test_all_black_quadrant_is_empty() {
        let quadrant = RgbImage::new(160, 160);
        let (result, _) = splitter().split_quadrant(&quadrant);
        assert!(matches!(result, SplitResult::Empty));
    }

    #[test]
    fn test_white_sheet_on_dark_background_found() {
        let mut quadrant = RgbImage::from_pixel(200, 160, Rgb([10, 10, 10]));
        for y in 20..140 {
            for x in 20..180 {
                quadrant.put_pixel(x, y, Rgb([245, 245, 245]));
            }
        }
        let (result, _) = splitter().split_quadrant(&quadrant);
        let SplitResult::Sheet { sheet, .. } = result else {
            panic!("expected sheet");
        };
        assert!(sheet.width() > 0 && sheet.height() > 0);
    }
}
