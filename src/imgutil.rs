//! Image helpers the processing steps share: grayscale conversion, affine
//! rotation with edge-replicated borders, and sub-pixel rectangle extraction.
//!
//! `imageproc`'s geometric transforms only support constant-color borders, so
//! the rotations here sample manually with clamped (replicated) coordinates,
//! the same way a scanner background is extended in the reference pipeline.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use nalgebra::{Matrix2, Vector2};

use crate::geometry::Point;

/// Converts an RGB image to 8-bit grayscale.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Adaptive mean thresholding with an additive offset.
///
/// A pixel becomes white when it exceeds the mean of its clamped
/// `(2*radius+1)²` neighborhood minus `offset`. A positive offset biases
/// flat regions toward white, which the foreground extraction chain relies
/// on; `imageproc`'s built-in adaptive threshold has no offset term.
pub fn adaptive_mean_threshold(image: &GrayImage, radius: u32, offset: i32) -> GrayImage {
    let (w, h) = image.dimensions();
    let integral: image::ImageBuffer<Luma<u64>, Vec<u64>> = integral_image(image);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let left = x.saturating_sub(radius);
            let top = y.saturating_sub(radius);
            let right = (x + radius).min(w - 1);
            let bottom = (y + radius).min(h - 1);
            let sum = sum_image_pixels(&integral, left, top, right, bottom)[0];
            let count = u64::from(right - left + 1) * u64::from(bottom - top + 1);
            let mean = (sum / count) as i32;
            if i32::from(image.get_pixel(x, y).0[0]) > mean - offset {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

/// Samples `image` at a fractional position with bilinear interpolation,
/// replicating the border for out-of-range coordinates.
fn sample_replicate(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let w = image.width() as i64;
    let h = image.height() as i64;
    let clamp = |v: i64, max: i64| v.clamp(0, max - 1);

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(clamp(x0, w) as u32, clamp(y0, h) as u32);
    let p10 = image.get_pixel(clamp(x0 + 1, w) as u32, clamp(y0, h) as u32);
    let p01 = image.get_pixel(clamp(x0, w) as u32, clamp(y0 + 1, h) as u32);
    let p11 = image.get_pixel(clamp(x0 + 1, w) as u32, clamp(y0 + 1, h) as u32);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00.0[c] as f32 * (1.0 - fx) + p10.0[c] as f32 * fx;
        let bottom = p01.0[c] as f32 * (1.0 - fx) + p11.0[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Rotates image content by `angle_deg` about `center`, keeping the original
/// dimensions and replicating edge pixels into uncovered regions.
///
/// A feature lying along direction `angle_deg` in the input ends up
/// axis-aligned in the output, matching the convention of
/// [`crate::geometry::RotatedRect::normalized`].
pub fn rotate_about(image: &RgbImage, center: Point, angle_deg: f32) -> RgbImage {
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    // Sampling matrix: destination offsets are rotated *forward* so content
    // rotates by -theta, i.e. a feature at `angle_deg` becomes horizontal.
    let m = Matrix2::new(cos, -sin, sin, cos);
    let c = Vector2::new(center.x, center.y);

    let mut out = RgbImage::new(image.width(), image.height());
    for y in 0..out.height() {
        for x in 0..out.width() {
            let d = Vector2::new(x as f32, y as f32) - c;
            let s = m * d + c;
            out.put_pixel(x, y, sample_replicate(image, s.x, s.y));
        }
    }
    out
}

/// Rotates image content by `angle_deg` about the image center.
pub fn rotate_about_center(image: &RgbImage, angle_deg: f32) -> RgbImage {
    let center = Point::new(image.width() as f32 / 2.0, image.height() as f32 / 2.0);
    rotate_about(image, center, angle_deg)
}

/// Extracts a `width` x `height` rectangle centered on `center` with
/// sub-pixel accuracy (bilinear sampling, replicated borders).
pub fn rect_subpix(image: &RgbImage, center: Point, width: u32, height: u32) -> RgbImage {
    let x0 = center.x - (width as f32 - 1.0) / 2.0;
    let y0 = center.y - (height as f32 - 1.0) / 2.0;
    let mut out = RgbImage::new(width.max(1), height.max(1));
    for y in 0..out.height() {
        for x in 0..out.width() {
            out.put_pixel(
                x,
                y,
                sample_replicate(image, x0 + x as f32, y0 + y as f32),
            );
        }
    }
    out
}

/// Crops an axis-aligned rectangle, clamped to the image bounds.
pub fn crop(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    let x = x.min(image.width().saturating_sub(1));
    let y = y.min(image.height().saturating_sub(1));
    let width = width.min(image.width() - x).max(1);
    let height = height.min(image.height() - y).max(1);
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Surrounds an image with a constant-color border of the given widths.
pub fn add_border(
    image: &RgbImage,
    horizontal: u32,
    vertical: u32,
    color: Rgb<u8>,
) -> RgbImage {
    let mut out = RgbImage::from_pixel(
        image.width() + 2 * horizontal,
        image.height() + 2 * vertical,
        color,
    );
    image::imageops::replace(&mut out, image, horizontal as i64, vertical as i64);
    out
}

/// Surrounds a grayscale image with a constant border of the given widths.
pub fn add_border_gray(
    image: &GrayImage,
    horizontal: u32,
    vertical: u32,
    value: u8,
) -> GrayImage {
    let mut out = GrayImage::from_pixel(
        image.width() + 2 * horizontal,
        image.height() + 2 * vertical,
        image::Luma([value]),
    );
    image::imageops::replace(&mut out, image, horizontal as i64, vertical as i64);
    out
}
