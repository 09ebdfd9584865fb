//! The sheet-normalization steps and their shared contract.
//!
//! Each step consumes an image and produces a transformed image plus
//! diagnostic artifacts (intermediate threshold maps, masks, detected
//! geometry renderings). The Batch Driver persists the artifacts when a
//! debug directory is configured; otherwise they are dropped.

pub mod fit;
pub mod margins;
pub mod rotate;
pub mod split;

pub use fit::CanonicalFitter;
pub use margins::MarginFinder;
pub use rotate::RotationCorrector;
pub use split::{QuadrantSplitter, SplitOutcome, SplitResult};

use std::path::Path;

use image::{GrayImage, RgbImage};

use crate::core::errors::ScanError;

/// One intermediate image produced while a step ran.
#[derive(Debug)]
pub struct Artifact {
    /// Short stage name, used in the persisted file name.
    pub name: String,
    pub image: ArtifactImage,
}

#[derive(Debug)]
pub enum ArtifactImage {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// Diagnostic artifacts accumulated by one step invocation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    artifacts: Vec<Artifact>,
}

impl Diagnostics {
    pub fn record_gray(&mut self, name: impl Into<String>, image: GrayImage) {
        self.artifacts.push(Artifact {
            name: name.into(),
            image: ArtifactImage::Gray(image),
        });
    }

    pub fn record_rgb(&mut self, name: impl Into<String>, image: RgbImage) {
        self.artifacts.push(Artifact {
            name: name.into(),
            image: ArtifactImage::Rgb(image),
        });
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Appends another step's artifacts after this one's.
    pub fn extend(&mut self, other: Diagnostics) {
        self.artifacts.extend(other.artifacts);
    }

    /// Writes every artifact as `{prefix}_{stage:02}_{name}.png` under `dir`.
    pub fn save_all(&self, dir: &Path, prefix: &str) -> Result<(), ScanError> {
        for (stage, artifact) in self.artifacts.iter().enumerate() {
            let path = dir.join(format!("{prefix}_{stage:02}_{}.png", artifact.name));
            match &artifact.image {
                ArtifactImage::Gray(img) => img.save(&path)?,
                ArtifactImage::Rgb(img) => img.save(&path)?,
            }
        }
        Ok(())
    }
}

/// The common output of a normalization step.
#[derive(Debug)]
pub struct StepOutput {
    pub image: RgbImage,
    pub diagnostics: Diagnostics,
}
