//! tally-scan turns photographed paper tally sheets into structured,
//! per-box recognition results.
//!
//! A raw scan holds several sheets, each in a configured quadrant. The
//! pipeline isolates every sheet from the scan background, deskews it,
//! crops it to its printed frame, resizes it into canonical template
//! geometry, and then resolves every template box against a closed
//! candidate vocabulary with a confidence score. Illegible boxes degrade
//! to zero confidence and are flagged for human review; they never abort
//! the batch.
//!
//! # Pipeline
//!
//! ```text
//! scan file -> QuadrantSplitter -> RotationCorrector -> MarginFinder
//!           -> CanonicalFitter -> BoxRecognizer -> sheet JSON + preview
//! ```
//!
//! The [`pipeline::BatchDriver`] sequences these steps over a scan
//! directory; each step is also usable on its own.

pub mod components;
pub mod core;
pub mod geometry;
pub mod imgutil;
pub mod morph;
pub mod pipeline;
pub mod recognize;
pub mod segments;
pub mod steps;
pub mod template;
pub mod vocabulary;

pub use crate::core::config::PipelineConfig;
pub use crate::core::errors::ScanError;
pub use crate::pipeline::{AbortFlag, BatchDriver, BatchSummary};
pub use crate::recognize::{BoxRecognizer, FallbackIdentity, OcrClient, OcrEngine};
pub use crate::template::{RecognizedSheet, SheetTemplate};
pub use crate::vocabulary::{Vocabularies, VocabularySnapshot};

#[cfg(feature = "tesseract")]
pub use crate::recognize::ocr::TesseractEngine;
