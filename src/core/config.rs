//! Configuration for the scan pipeline.
//!
//! All tunables live here as serde-deserializable structs so a run can be
//! driven from a single TOML file. The `Default` impls carry the values the
//! pipeline was calibrated with; a config file only needs to override what
//! differs. `PipelineConfig::validate` rejects inconsistent settings up front
//! so the batch never starts with a geometry it cannot honor.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::ScanError;

/// A rectangle in coordinates relative to an enclosing image, all in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RelRect {
    /// Left edge, relative.
    pub x0: f32,
    /// Top edge, relative.
    pub y0: f32,
    /// Right edge, relative.
    pub x1: f32,
    /// Bottom edge, relative.
    pub y1: f32,
}

impl RelRect {
    /// Creates a new relative rectangle.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Resolves this rectangle against an image of `width` x `height` pixels,
    /// returning `(x, y, w, h)` in absolute pixels.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.x0 * width as f32) as u32;
        let y0 = (self.y0 * height as f32) as u32;
        let x1 = (self.x1 * width as f32) as u32;
        let y1 = (self.y1 * height as f32) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    fn is_valid(&self) -> bool {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        in_range(self.x0)
            && in_range(self.y0)
            && in_range(self.x1)
            && in_range(self.y1)
            && self.x0 < self.x1
            && self.y0 < self.y1
    }
}

/// How raw scan files are normalized before quadrant splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Whole-multiple-of-90° rotation applied to every raw scan,
    /// expressed in quarter turns clockwise (0..=3).
    pub rotation_quarter_turns: u32,
    /// Width every raw scan is resized to before splitting.
    pub target_width: u32,
    /// Height every raw scan is resized to before splitting.
    pub target_height: u32,
    /// One rectangle per sheet expected on a scan, in relative coordinates.
    pub quadrants: Vec<RelRect>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rotation_quarter_turns: 0,
            target_width: 3672,
            target_height: 6528,
            quadrants: vec![
                RelRect::new(0.0, 0.0, 0.5, 0.5),
                RelRect::new(0.5, 0.0, 1.0, 0.5),
                RelRect::new(0.0, 0.5, 0.5, 1.0),
                RelRect::new(0.5, 0.5, 1.0, 1.0),
            ],
        }
    }
}

/// Foreground extraction parameters for the quadrant splitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Base structuring-element size; the medium and large kernels are
    /// derived from it (5x4 and 10x8 multiples respectively).
    pub kernel_size: u32,
    /// Fraction of a quadrant the foreground mask must cover for the
    /// quadrant to count as holding a sheet.
    pub min_coverage: f32,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            kernel_size: 7,
            min_coverage: 0.25,
        }
    }
}

/// Line detection and angle voting parameters for the rotation corrector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RotateConfig {
    /// Minimum length (pixels) for a detected line segment.
    pub min_line_length: u32,
    /// Maximum gap (pixels) bridged inside one segment.
    pub max_line_gap: u32,
    /// Angular bucket width in degrees for correction-angle voting.
    pub precision_deg: f32,
    /// Buckets whose summed supporting segment length (pixels) falls below
    /// this are discarded, so a single stray segment cannot steer the
    /// correction on its own.
    pub vote_threshold: u32,
    /// Structuring-element size for closing gaps in the edge map.
    pub kernel_size: u32,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            min_line_length: 200,
            max_line_gap: 5,
            precision_deg: 0.25,
            vote_threshold: 1000,
            kernel_size: 2,
        }
    }
}

/// Line detection and corner clustering parameters for the margin finder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginConfig {
    /// Minimum length (pixels) for a detected line segment.
    pub min_line_length: u32,
    /// Maximum gap (pixels) bridged inside one segment.
    pub max_line_gap: u32,
    /// Endpoints within this radius of a cluster centroid merge into it.
    pub corner_radius: f32,
    /// Structuring-element size for closing gaps in the edge map.
    pub kernel_size: u32,
    /// Candidate crops smaller than this area (pixels) are rejected as
    /// spurious and the sheet is left uncropped.
    pub min_crop_area: u32,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            min_line_length: 800,
            max_line_gap: 1,
            corner_radius: 6.0,
            kernel_size: 9,
            min_crop_area: 800 * 600,
        }
    }
}

/// Per-box recognition parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizeConfig {
    /// Margin (pixels) added around a box rectangle before cropping.
    pub box_margin: u32,
    /// Ink components below this pixel area are discarded as stroke noise.
    pub min_component_area: u32,
    /// Ink components with min(extent)/max(extent) below this are discarded.
    pub min_normalized_aspect_ratio: f32,
    /// Boxes below this confidence are highlighted in the preview image.
    pub confidence_threshold: f32,
    /// Upper bound on a single OCR engine invocation, in milliseconds.
    /// Expiry is treated as a recognition failure, not a fatal error.
    pub ocr_timeout_ms: u64,
    /// Maximum number of sheets a product can span; bounds the page-number
    /// vocabulary.
    pub max_pages_per_product: u32,
    /// Format string for page-number box content; `{n}` is replaced by the
    /// page number.
    pub page_number_format: String,
}

impl Default for RecognizeConfig {
    fn default() -> Self {
        Self {
            box_margin: 5,
            min_component_area: 100,
            min_normalized_aspect_ratio: 0.1,
            confidence_threshold: 0.5,
            ocr_timeout_ms: 10_000,
            max_pages_per_product: 9,
            page_number_format: "PAGE {n}".to_string(),
        }
    }
}

/// Aggregate configuration for one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw scan normalization and quadrant layout.
    pub scan: ScanConfig,
    /// Quadrant splitter tunables.
    pub split: SplitConfig,
    /// Rotation corrector tunables.
    pub rotate: RotateConfig,
    /// Margin finder tunables.
    pub margins: MarginConfig,
    /// Box recognizer tunables.
    pub recognize: RecognizeConfig,
}

impl PipelineConfig {
    /// Loads a configuration from a TOML file, falling back to defaults for
    /// any omitted field.
    pub fn from_toml_path(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScanError::io(format!("reading config {}", path.display()), e))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| ScanError::config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency of the configuration.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scan.rotation_quarter_turns > 3 {
            return Err(ScanError::invalid_field(
                "scan.rotation_quarter_turns",
                "0..=3",
                self.scan.rotation_quarter_turns.to_string(),
            ));
        }
        if self.scan.quadrants.is_empty() {
            return Err(ScanError::config("scan.quadrants must not be empty"));
        }
        for (idx, q) in self.scan.quadrants.iter().enumerate() {
            if !q.is_valid() {
                return Err(ScanError::invalid_field(
                    format!("scan.quadrants[{idx}]"),
                    "0 <= x0 < x1 <= 1 and 0 <= y0 < y1 <= 1",
                    format!("{q:?}"),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.split.min_coverage) {
            return Err(ScanError::invalid_field(
                "split.min_coverage",
                "a fraction in [0, 1]",
                self.split.min_coverage.to_string(),
            ));
        }
        if self.rotate.precision_deg <= 0.0 {
            return Err(ScanError::invalid_field(
                "rotate.precision_deg",
                "a positive angle",
                self.rotate.precision_deg.to_string(),
            ));
        }
        if !self.recognize.page_number_format.contains("{n}") {
            return Err(ScanError::invalid_field(
                "recognize.page_number_format",
                "a string containing '{n}'",
                self.recognize.page_number_format.clone(),
            ));
        }
        Ok(())
    }
}
