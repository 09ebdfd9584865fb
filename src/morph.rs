//! Binary morphology with rectangular structuring elements.
//!
//! The foreground extraction chain needs wide, non-square kernels (e.g.
//! 35x28 or 48x12) that `imageproc`'s norm-based morphology cannot express,
//! so erosion and dilation are implemented here as separable sliding-window
//! passes over prefix sums of the white-pixel counts. Images are treated as
//! binary: zero is background, anything else is foreground (written as 255).

use image::GrayImage;

/// A rectangular structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectKernel {
    /// Kernel width in pixels.
    pub width: u32,
    /// Kernel height in pixels.
    pub height: u32,
}

impl RectKernel {
    /// Creates a kernel of `width` x `height` pixels (each at least 1).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Creates a square kernel.
    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

/// Window sum of white pixels around each position along one axis.
///
/// The window for position `i` spans `[i - (k-1)/2, i + k/2]`, clamped to the
/// image; `counts[i]` receives the number of in-range foreground pixels, and
/// `sizes[i]` the number of in-range window cells.
fn window_counts(line: &[u8], k: usize, counts: &mut [u32], sizes: &mut [u32]) {
    let n = line.len();
    let before = (k - 1) / 2;
    let after = k / 2;

    // Prefix sums: prefix[i] = number of white pixels in line[..i].
    let mut prefix = vec![0u32; n + 1];
    for i in 0..n {
        prefix[i + 1] = prefix[i] + u32::from(line[i] != 0);
    }

    for i in 0..n {
        let lo = i.saturating_sub(before);
        let hi = (i + after + 1).min(n);
        counts[i] = prefix[hi] - prefix[lo];
        sizes[i] = (hi - lo) as u32;
    }
}

/// One separable pass: `keep(count, window_size)` decides the output pixel.
fn separable_pass(
    image: &GrayImage,
    kernel: RectKernel,
    keep: impl Fn(u32, u32) -> bool + Copy,
) -> GrayImage {
    let (w, h) = image.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let src = image.as_raw();

    // Horizontal pass.
    let mut horizontal = vec![0u8; wu * hu];
    let mut counts = vec![0u32; wu];
    let mut sizes = vec![0u32; wu];
    for y in 0..hu {
        let row = &src[y * wu..(y + 1) * wu];
        window_counts(row, kernel.width as usize, &mut counts, &mut sizes);
        for x in 0..wu {
            horizontal[y * wu + x] = if keep(counts[x], sizes[x]) { 255 } else { 0 };
        }
    }

    // Vertical pass over the horizontal result.
    let mut out = vec![0u8; wu * hu];
    let mut column = vec![0u8; hu];
    let mut counts = vec![0u32; hu];
    let mut sizes = vec![0u32; hu];
    for x in 0..wu {
        for y in 0..hu {
            column[y] = horizontal[y * wu + x];
        }
        window_counts(&column, kernel.height as usize, &mut counts, &mut sizes);
        for y in 0..hu {
            out[y * wu + x] = if keep(counts[y], sizes[y]) { 255 } else { 0 };
        }
    }

    GrayImage::from_raw(w, h, out).expect("buffer matches dimensions")
}

/// Dilation: a pixel is foreground if any pixel under the kernel is.
pub fn dilate(image: &GrayImage, kernel: RectKernel) -> GrayImage {
    separable_pass(image, kernel, |count, _| count > 0)
}

/// Erosion: a pixel is foreground only if every pixel under the (clamped)
/// kernel is.
pub fn erode(image: &GrayImage, kernel: RectKernel) -> GrayImage {
    separable_pass(image, kernel, |count, size| count == size)
}

/// Closing: dilation followed by erosion. Fills small gaps.
pub fn close(image: &GrayImage, kernel: RectKernel) -> GrayImage {
    erode(&dilate(image, kernel), kernel)
}

/// Opening: erosion followed by dilation. Removes small speckles.
pub fn open(image: &GrayImage, kernel: RectKernel) -> GrayImage {
    dilate(&erode(image, kernel), kernel)
}

/// Inverts a binary image in place: zero becomes 255 and vice versa.
pub fn invert(image: &mut GrayImage) {
    for pixel in image.pixels_mut() {
        pixel.0[0] = if pixel.0[0] == 0 { 255 } else { 0 };
    }
}
