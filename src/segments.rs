//! Line-segment detection on edge maps.
//!
//! The Hough transform in `imageproc` yields infinite polar lines; the
//! deskewing and margin-finding steps need finite segments with endpoints.
//! Each detected polar line is therefore traced across the edge map and
//! split into runs of supporting pixels, bridging gaps up to a configured
//! length and discarding runs shorter than a minimum.

use image::GrayImage;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use tracing::debug;

use crate::geometry::{LineSegment, Point};

/// Parameters for [`detect_segments`].
#[derive(Debug, Clone, Copy)]
pub struct SegmentDetectionOptions {
    /// Minimum accumulator votes for a polar line to be considered.
    pub vote_threshold: u32,
    /// Non-maximum suppression radius in Hough space.
    pub suppression_radius: u32,
    /// Minimum segment length in pixels.
    pub min_length: f32,
    /// Maximum run of unsupported pixels bridged within one segment.
    pub max_gap: f32,
}

/// True if the 3x3 neighborhood of the rounded position contains an edge
/// pixel. The tolerance absorbs rasterization error between the polar line
/// and the drawn edge.
fn supported(edges: &GrayImage, x: f32, y: f32) -> bool {
    let (w, h) = (edges.width() as i64, edges.height() as i64);
    let cx = x.round() as i64;
    let cy = y.round() as i64;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let (px, py) = (cx + dx, cy + dy);
            if px >= 0 && py >= 0 && px < w && py < h && edges.get_pixel(px as u32, py as u32).0[0] != 0
            {
                return true;
            }
        }
    }
    false
}

/// Walks along one polar line and emits the supported runs as segments.
fn trace_line(
    edges: &GrayImage,
    line: PolarLine,
    options: &SegmentDetectionOptions,
    out: &mut Vec<LineSegment>,
) {
    let theta = (line.angle_in_degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    // Points on the line: p(t) = r * (cos, sin) + t * (-sin, cos).
    let origin = (line.r * cos, line.r * sin);

    let diagonal = (edges.width() as f32).hypot(edges.height() as f32);
    let mut t = -diagonal;
    let mut run_start: Option<f32> = None;
    let mut last_hit = 0.0f32;

    while t <= diagonal {
        let x = origin.0 - t * sin;
        let y = origin.1 + t * cos;
        let inside = x >= 0.0 && y >= 0.0 && x < edges.width() as f32 && y < edges.height() as f32;
        let hit = inside && supported(edges, x, y);

        if hit {
            if run_start.is_none() {
                run_start = Some(t);
            }
            last_hit = t;
        } else if let Some(start) = run_start {
            if t - last_hit > options.max_gap {
                push_run(origin, sin, cos, start, last_hit, options.min_length, out);
                run_start = None;
            }
        }
        t += 1.0;
    }
    if let Some(start) = run_start {
        push_run(origin, sin, cos, start, last_hit, options.min_length, out);
    }
}

fn push_run(
    origin: (f32, f32),
    sin: f32,
    cos: f32,
    start: f32,
    end: f32,
    min_length: f32,
    out: &mut Vec<LineSegment>,
) {
    if end - start < min_length {
        return;
    }
    let point_at = |t: f32| Point::new(origin.0 - t * sin, origin.1 + t * cos);
    out.push(LineSegment::new(point_at(start), point_at(end)));
}

/// Detects finite line segments in a binary edge map.
///
/// Runs the Hough transform, then traces each accepted polar line across the
/// edge pixels to recover endpoints. Returns an empty vector when nothing
/// passes the vote threshold.
pub fn detect_segments(edges: &GrayImage, options: &SegmentDetectionOptions) -> Vec<LineSegment> {
    let lines = detect_lines(
        edges,
        LineDetectionOptions {
            vote_threshold: options.vote_threshold,
            suppression_radius: options.suppression_radius,
        },
    );
    debug!(polar_lines = lines.len(), "hough transform complete");

    let mut segments = Vec::new();
    for line in lines {
        trace_line(edges, line, options, &mut segments);
    }
    debug!(segments = segments.len(), "segment tracing complete");
    segments
}
