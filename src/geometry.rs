//! Geometric primitives shared by the processing steps.
//!
//! This module provides 2D points, line segments, grid-alignment angles, and a
//! rotated-rectangle fit (convex hull + rotating calipers) used by both the
//! quadrant splitter and the per-box ink isolation.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X-coordinate of the point.
    pub x: f32,
    /// Y-coordinate of the point.
    pub y: f32,
}

impl Point {
    /// Creates a new point with the given coordinates.
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A line segment between two pixel positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    /// First endpoint.
    pub start: Point,
    /// Second endpoint.
    pub end: Point,
}

impl LineSegment {
    /// Creates a new segment.
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Length of the segment in pixels.
    pub fn length(&self) -> f32 {
        self.start.distance_to(self.end)
    }

    /// Minimal rotation (radians, in `(-π/4, π/4]`) that makes this segment
    /// either horizontal or vertical. Zero for degenerate segments.
    pub fn min_angle_to_grid(&self) -> f32 {
        min_angle_to_grid(self.start, self.end)
    }
}

/// Computes the minimal rotation (radians) aligning the line through `p0` and
/// `p1` with the nearest image axis.
///
/// The result lies in `(-π/4, π/4]`: rotating the image content by this angle
/// (positive = towards the positive-y half, i.e. the same convention as
/// [`crate::imgutil::rotate_about_center`]) maps the line onto a horizontal or
/// vertical grid line. Axis-aligned input yields exactly zero.
pub fn min_angle_to_grid(p0: Point, p1: Point) -> f32 {
    let dx = p1.x - p0.x;
    let dy = p1.y - p0.y;
    if dx == 0.0 || dy == 0.0 {
        return 0.0;
    }
    let mut alpha = dy.atan2(dx).rem_euclid(FRAC_PI_2);
    if alpha > FRAC_PI_4 {
        alpha -= FRAC_PI_2;
    }
    alpha
}

/// A rectangle at an arbitrary orientation: center, extents and angle.
///
/// `angle_deg` follows the OpenCV `minAreaRect` convention: it lies in
/// `[-90, 0)` and measures the rotation from the horizontal axis to the edge
/// reported as `width`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    /// Center of the rectangle.
    pub center: Point,
    /// Extent along the `angle_deg` direction.
    pub width: f32,
    /// Extent perpendicular to the `angle_deg` direction.
    pub height: f32,
    /// Orientation in degrees, in `[-90, 0)`.
    pub angle_deg: f32,
}

impl RotatedRect {
    /// Area of the rectangle.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Normalizes the rectangle for deskewing: when the reported angle is
    /// below -45° the extents are swapped and 90° added, so the resulting
    /// angle lies in `[-45, 45)` and `width`/`height` match the upright
    /// orientation of the content.
    pub fn normalized(&self) -> RotatedRect {
        if self.angle_deg < -45.0 {
            RotatedRect {
                center: self.center,
                width: self.height,
                height: self.width,
                angle_deg: self.angle_deg + 90.0,
            }
        } else {
            *self
        }
    }
}

/// Computes the minimum-area rotated rectangle enclosing `points` using the
/// rotating-calipers algorithm over the convex hull.
///
/// Returns `None` when `points` is empty. Collinear or single-point input
/// degenerates to an axis-aligned rectangle of the bounding extents.
pub fn min_area_rect(points: &[Point]) -> Option<RotatedRect> {
    if points.is_empty() {
        return None;
    }

    let hull = convex_hull(points);
    if hull.len() < 3 {
        // Degenerate: fall back to the axis-aligned bounding box.
        let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
        let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        return Some(to_opencv_convention(
            Point::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
            max_x - min_x,
            max_y - min_y,
            0.0,
        ));
    }

    let n = hull.len();
    let mut best_area = f32::MAX;
    let mut best: Option<RotatedRect> = None;

    for i in 0..n {
        let j = (i + 1) % n;
        let edge_x = hull[j].x - hull[i].x;
        let edge_y = hull[j].y - hull[i].y;
        let edge_length = (edge_x * edge_x + edge_y * edge_y).sqrt();
        if edge_length < f32::EPSILON {
            continue;
        }

        let nx = edge_x / edge_length;
        let ny = edge_y / edge_length;
        let px = -ny;
        let py = nx;

        let mut min_n = f32::MAX;
        let mut max_n = f32::MIN;
        let mut min_p = f32::MAX;
        let mut max_p = f32::MIN;
        for point in &hull {
            let proj_n = nx * (point.x - hull[i].x) + ny * (point.y - hull[i].y);
            min_n = min_n.min(proj_n);
            max_n = max_n.max(proj_n);
            let proj_p = px * (point.x - hull[i].x) + py * (point.y - hull[i].y);
            min_p = min_p.min(proj_p);
            max_p = max_p.max(proj_p);
        }

        let width = max_n - min_n;
        let height = max_p - min_p;
        let area = width * height;
        if area < best_area {
            best_area = area;
            let center_n = (min_n + max_n) / 2.0;
            let center_p = (min_p + max_p) / 2.0;
            let center = Point::new(
                hull[i].x + center_n * nx + center_p * px,
                hull[i].y + center_n * ny + center_p * py,
            );
            best = Some(to_opencv_convention(
                center,
                width,
                height,
                f32::atan2(ny, nx),
            ));
        }
    }

    best
}

/// Maps a rectangle whose edge of extent `along` lies at `angle_rad` into the
/// OpenCV convention (angle in `[-90, 0)`, `width` along the angle direction).
fn to_opencv_convention(center: Point, along: f32, across: f32, angle_rad: f32) -> RotatedRect {
    // Reduce the edge orientation into [0, 90). Every quarter turn swaps the
    // roles of the two extents.
    let mut deg = (angle_rad * 180.0 / PI).rem_euclid(180.0);
    let (mut w, mut h) = (along, across);
    if deg >= 90.0 {
        deg -= 90.0;
        std::mem::swap(&mut w, &mut h);
    }
    // `deg` is now the orientation of the `w` edge; the OpenCV angle points
    // along the perpendicular edge.
    RotatedRect {
        center,
        width: h,
        height: w,
        angle_deg: deg - 90.0,
    }
}

/// Computes the convex hull of `points` using Graham's scan.
fn convex_hull(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut points = points.to_vec();
    let mut start_idx = 0;
    for i in 1..points.len() {
        if points[i].y < points[start_idx].y
            || (points[i].y == points[start_idx].y && points[i].x < points[start_idx].x)
        {
            start_idx = i;
        }
    }
    points.swap(0, start_idx);
    let start = points[0];

    points[1..].sort_by(|a, b| {
        let cross = cross_product(start, *a, *b);
        if cross == 0.0 {
            let da = (a.x - start.x).powi(2) + (a.y - start.y).powi(2);
            let db = (b.x - start.x).powi(2) + (b.y - start.y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        } else if cross > 0.0 {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    });

    let mut hull: Vec<Point> = Vec::new();
    for point in points {
        while hull.len() > 1 && cross_product(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0.0
        {
            hull.pop();
        }
        hull.push(point);
    }
    hull
}

fn cross_product(p1: Point, p2: Point, p3: Point) -> f32 {
    (p2.x - p1.x) * (p3.y - p1.y) - (p2.y - p1.y) * (p3.x - p1.x)
}
