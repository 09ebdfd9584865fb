//! Canonical fitting: resizing a cropped sheet into template pixel space.
//!
//! The margin-cropped content is resized to the template frame's interior
//! dimensions and surrounded with a white border matching the template's
//! absolute margins, so every downstream box rectangle indexes directly into
//! the produced image.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::steps::{Diagnostics, StepOutput};
use crate::template::{PixelRect, SheetTemplate};

/// Produces canonical sheet images for one template.
#[derive(Debug)]
pub struct CanonicalFitter {
    width: u32,
    height: u32,
    frame: PixelRect,
}

impl CanonicalFitter {
    pub fn new(template: &SheetTemplate) -> Self {
        Self {
            width: template.width(),
            height: template.height(),
            frame: template.frame(),
        }
    }

    /// Fits a cropped sheet into canonical geometry.
    pub fn fit(&self, cropped: &RgbImage) -> StepOutput {
        let inner = imageops::resize(
            cropped,
            self.frame.width(),
            self.frame.height(),
            FilterType::CatmullRom,
        );
        let mut canonical =
            RgbImage::from_pixel(self.width, self.height, Rgb([255, 255, 255]));
        imageops::replace(
            &mut canonical,
            &inner,
            i64::from(self.frame.x0),
            i64::from(self.frame.y0),
        );
        debug!(
            from_width = cropped.width(),
            from_height = cropped.height(),
            "fitted sheet to canonical geometry"
        );
        StepOutput {
            image: canonical,
            diagnostics: Diagnostics::default(),
        }
    }
}
