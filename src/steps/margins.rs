//! Margin finding: cropping a deskewed sheet to its printed frame.
//!
//! The frame's four corners are recovered by clustering the endpoints of
//! long detected line segments and picking, for each image corner, the
//! nearest cluster centroid. Cropping is abandoned (with a warning) when
//! fewer than four clusters emerge or when the candidate region is
//! implausibly small.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::edges::canny;
use tracing::{debug, warn};

use crate::core::config::MarginConfig;
use crate::geometry::Point;
use crate::imgutil;
use crate::morph::{self, RectKernel};
use crate::segments::{detect_segments, SegmentDetectionOptions};
use crate::steps::rotate::{CANNY_HIGH, CANNY_LOW};
use crate::steps::{Diagnostics, StepOutput};

/// A running endpoint cluster with an incrementally updated centroid.
#[derive(Debug, Clone, Copy)]
struct Cluster {
    centroid: Point,
    count: u32,
}

impl Cluster {
    fn absorb(&mut self, point: Point) {
        let n = self.count as f32;
        self.centroid = Point::new(
            (self.centroid.x * n + point.x) / (n + 1.0),
            (self.centroid.y * n + point.y) / (n + 1.0),
        );
        self.count += 1;
    }
}

/// Crops a corrected sheet image to the printed reference frame.
#[derive(Debug)]
pub struct MarginFinder {
    config: MarginConfig,
}

impl MarginFinder {
    pub fn new(config: MarginConfig) -> Self {
        Self { config }
    }

    /// Finds the frame corners and crops to them, or returns the input
    /// unchanged when the frame cannot be located reliably.
    pub fn crop(&self, sheet: &RgbImage) -> StepOutput {
        let mut diagnostics = Diagnostics::default();

        let gray = imgutil::to_gray(sheet);
        let mut edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
        edges = morph::close(&edges, RectKernel::square(self.config.kernel_size));
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

        let clusters = self.cluster_endpoints(&segments);
        debug!(
            segments = segments.len(),
            clusters = clusters.len(),
            "margin corner clustering"
        );
        if clusters.len() < 4 {
            warn!(clusters = clusters.len(), "fewer than 4 corner clusters, keeping uncropped sheet");
            return StepOutput {
                image: sheet.clone(),
                diagnostics,
            };
        }

        let (w, h) = (sheet.width() as f32 - 1.0, sheet.height() as f32 - 1.0);
        let image_corners = [
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(0.0, h),
            Point::new(w, h),
        ];
        let chosen: Vec<Point> = image_corners
            .iter()
            .map(|corner| {
                clusters
                    .iter()
                    .min_by(|a, b| {
                        corner
                            .distance_to(a.centroid)
                            .total_cmp(&corner.distance_to(b.centroid))
                    })
                    .map(|c| c.centroid)
                    .unwrap_or(*corner)
            })
            .collect();

        let mut corners_view = sheet.clone();
        for p in &chosen {
            draw_filled_circle_mut(
                &mut corners_view,
                (p.x.round() as i32, p.y.round() as i32),
                5,
                Rgb([255, 0, 0]),
            );
        }
        diagnostics.record_rgb("corners", corners_view);

        let x0 = chosen.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
        let y0 = chosen.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let x1 = chosen.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
        let y1 = chosen.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        let area = (x1 - x0) * (y1 - y0);
        if area < self.config.min_crop_area as f32 {
            warn!(area, "candidate crop region too small, keeping uncropped sheet");
            return StepOutput {
                image: sheet.clone(),
                diagnostics,
            };
        }

        let image = imgutil::crop(
            sheet,
            x0.max(0.0) as u32,
            y0.max(0.0) as u32,
            (x1 - x0).round() as u32,
            (y1 - y0).round() as u32,
        );
        StepOutput { image, diagnostics }
    }

    /// Greedy incremental clustering of segment endpoints.
    fn cluster_endpoints(&self, segments: &[crate::geometry::LineSegment]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();
        for segment in segments {
            for point in [segment.start, segment.end] {
                match clusters
                    .iter_mut()
                    .find(|c| c.centroid.distance_to(point) <= self.config.corner_radius)
                {
                    Some(cluster) => cluster.absorb(point),
                    None => clusters.push(Cluster {
                        centroid: point,
                        count: 1,
                    }),
                }
            }
        }
        clusters
    }
}
