//! Core infrastructure of the scan pipeline: configuration and errors.

pub mod config;
pub mod errors;

pub use config::{PipelineConfig, RelRect};
pub use errors::ScanError;
