//! Connected-component labeling with per-component statistics.
//!
//! Thin layer over `imageproc`'s region labeling that collects the pixel
//! area and bounding box of every foreground component, the two facts the
//! splitter and box recognizer filter on.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use itertools::Itertools;

/// Statistics of one labeled foreground component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStats {
    /// The component's label in the label image (1-based; 0 is background).
    pub label: u32,
    /// Number of pixels in the component.
    pub area: u32,
    /// Leftmost column.
    pub left: u32,
    /// Topmost row.
    pub top: u32,
    /// Bounding-box width in pixels.
    pub width: u32,
    /// Bounding-box height in pixels.
    pub height: u32,
}

impl ComponentStats {
    /// min(extent) / max(extent) of the bounding box, in (0, 1].
    ///
    /// Close to 1 for compact blobs, close to 0 for hairline strokes.
    pub fn normalized_aspect_ratio(&self) -> f32 {
        let long = self.width.max(self.height).max(1) as f32;
        let short = self.width.min(self.height) as f32;
        short / long
    }

    /// Whether the bounding box touches the border of a `width` x `height`
    /// image.
    pub fn touches_border(&self, width: u32, height: u32) -> bool {
        self.left == 0
            || self.top == 0
            || self.left + self.width >= width
            || self.top + self.height >= height
    }
}

/// A labeled binary image together with its component statistics.
#[derive(Debug)]
pub struct LabeledImage {
    /// Per-pixel labels; 0 is background.
    pub labels: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    /// Statistics for each foreground component, sorted by descending area.
    pub components: Vec<ComponentStats>,
}

impl LabeledImage {
    /// Renders the pixels of a single component as a binary mask.
    pub fn component_mask(&self, label: u32) -> GrayImage {
        let mut mask = GrayImage::new(self.labels.width(), self.labels.height());
        for (x, y, pixel) in self.labels.enumerate_pixels() {
            if pixel.0[0] == label {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    /// Renders a binary mask of every component in `keep`.
    pub fn mask_of(&self, keep: &[u32]) -> GrayImage {
        let mut mask = GrayImage::new(self.labels.width(), self.labels.height());
        for (x, y, pixel) in self.labels.enumerate_pixels() {
            if pixel.0[0] != 0 && keep.contains(&pixel.0[0]) {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }
}

/// Labels the 8-connected foreground components of a binary image.
///
/// Background is zero; the returned components are ordered largest-first by
/// pixel area.
pub fn label_components(image: &GrayImage) -> LabeledImage {
    let labels = connected_components(image, Connectivity::Eight, Luma([0u8]));

    let mut stats: std::collections::HashMap<u32, ComponentStats> = std::collections::HashMap::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        let entry = stats.entry(label).or_insert(ComponentStats {
            label,
            area: 0,
            left: x,
            top: y,
            width: 0,
            height: 0,
        });
        entry.area += 1;
        // Track extents as inclusive corners first; widths fixed up below.
        entry.left = entry.left.min(x);
        entry.top = entry.top.min(y);
        entry.width = entry.width.max(x);
        entry.height = entry.height.max(y);
    }

    let components = stats
        .into_values()
        .map(|c| ComponentStats {
            width: c.width - c.left + 1,
            height: c.height - c.top + 1,
            ..c
        })
        .sorted_by_key(|c| std::cmp::Reverse(c.area))
        .collect();

    LabeledImage { labels, components }
}
