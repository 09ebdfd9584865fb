//! Global deskewing by circular-mean angle voting.
//!
//! Long straight features (the printed frame and grid rules) are detected as
//! line segments; each segment votes for the minimal rotation that would
//! align it with the pixel grid. Votes are bucketed at the configured angular
//! precision and weighted by segment length, and the surviving buckets are
//! averaged as unit vectors. Arithmetic averaging of raw angles would be
//! wrong at the wrap-around, hence the vector mean.

use std::collections::HashMap;

use image::RgbImage;
use imageproc::edges::canny;
use tracing::{debug, warn};

use crate::core::config::RotateConfig;
use crate::geometry::LineSegment;
use crate::imgutil;
use crate::morph::{self, RectKernel};
use crate::segments::{detect_segments, SegmentDetectionOptions};
use crate::steps::Diagnostics;

/// Canny hysteresis thresholds used by the deskewing steps.
pub(crate) const CANNY_LOW: f32 = 50.0;
pub(crate) const CANNY_HIGH: f32 = 150.0;

/// A deskewed sheet together with the applied correction angle.
#[derive(Debug)]
pub struct RotationOutcome {
    pub image: RgbImage,
    /// Correction angle in degrees; zero when no reliable vote emerged.
    pub angle_deg: f32,
    pub diagnostics: Diagnostics,
}

/// Corrects the global skew of a split sheet image.
#[derive(Debug)]
pub struct RotationCorrector {
    config: RotateConfig,
}

impl RotationCorrector {
    pub fn new(config: RotateConfig) -> Self {
        Self { config }
    }

    /// Detects line segments and rotates the sheet by the voted angle.
    pub fn correct(&self, sheet: &RgbImage) -> RotationOutcome {
        let mut diagnostics = Diagnostics::default();

        let gray = imgutil::to_gray(sheet);
        let kernel = RectKernel::square(self.config.kernel_size);
        let mut edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
        edges = morph::close(&edges, kernel);
        edges = morph::dilate(&edges, kernel);
        diagnostics.record_gray("edges", edges.clone());

        let segments = detect_segments(
            &edges,
            &SegmentDetectionOptions {
                vote_threshold: self.config.min_line_length,
                suppression_radius: 8,
                min_length: self.config.min_line_length as f32,
                max_gap: self.config.max_line_gap as f32,
            },
        );

        let angle_deg = self.vote_angle(&segments);
        debug!(angle_deg, segments = segments.len(), "rotation correction");

        RotationOutcome {
            image: imgutil::rotate_about_center(sheet, angle_deg),
            angle_deg,
            diagnostics,
        }
    }

    /// Buckets per-segment grid-alignment angles, weighted by segment
    /// length, and returns the circular mean of the buckets whose summed
    /// length clears the vote threshold. Zero when nothing is reliable.
    fn vote_angle(&self, segments: &[LineSegment]) -> f32 {
        if segments.is_empty() {
            warn!("no line segments detected, skipping rotation correction");
            return 0.0;
        }

        let precision = self.config.precision_deg;
        let mut buckets: HashMap<i64, u32> = HashMap::new();
        for segment in segments {
            let angle_deg = segment.min_angle_to_grid().to_degrees();
            let bucket = (angle_deg / precision).round() as i64;
            *buckets.entry(bucket).or_insert(0) += segment.length().round() as u32;
        }
        debug!(?buckets, "angle vote buckets");

        let mut x = 0.0f64;
        let mut y = 0.0f64;
        let mut survivors = 0;
        for (&bucket, &votes) in &buckets {
            if votes < self.config.vote_threshold {
                continue;
            }
            survivors += 1;
            let angle = (bucket as f64 * precision as f64).to_radians();
            x += votes as f64 * angle.cos();
            y += votes as f64 * angle.sin();
        }
        if survivors == 0 {
            warn!(
                vote_threshold = self.config.vote_threshold,
                "no angle bucket survived voting, skipping rotation correction"
            );
            return 0.0;
        }
        y.atan2(x).to_degrees() as f32
    }
}
