//! Error types for the scan pipeline.
//!
//! The taxonomy follows one rule: illegible content is *data*, not an error.
//! A box that cannot be read degrades to empty text with zero confidence and
//! is flagged for human review downstream. `ScanError` is reserved for faults
//! that genuinely prevent processing: a template/geometry mismatch, a missing
//! box name, an unusable configuration, or I/O failure.

use thiserror::Error;

/// Errors that abort processing of a sheet or the whole batch.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Error occurred while loading or decoding an image.
    #[error("image load")]
    ImageLoad(#[from] image::ImageError),

    /// Structural fault: the sheet or template violates an invariant the
    /// pipeline depends on (missing box name, canonical geometry mismatch).
    /// Fatal for the current sheet and surfaced to the operator.
    #[error("structural fault: {context}")]
    Structural {
        /// Description of the violated invariant.
        context: String,
    },

    /// The configuration is invalid or incomplete.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },

    /// The OCR engine could not be constructed or its worker disappeared.
    /// A *slow* engine is not an error (a timed-out call degrades to zero
    /// confidence); a *dead* engine is.
    #[error("ocr engine: {context}")]
    Ocr {
        /// Additional context about the engine failure.
        context: String,
        /// The underlying error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to serialize a recognized sheet.
    #[error("sheet serialization")]
    Serialize(#[from] serde_json::Error),

    /// IO error, propagated with the originating operation as context.
    #[error("io: {context}")]
    Io {
        /// What the pipeline was doing when the error occurred.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Creates a structural fault error.
    pub fn structural(context: impl Into<String>) -> Self {
        Self::Structural {
            context: context.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a configuration error for invalid field values.
    pub fn invalid_field(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Config {
            message: format!(
                "invalid value for field '{}': expected {}, got {}",
                field.into(),
                expected.into(),
                actual.into()
            ),
        }
    }

    /// Creates an OCR engine error without an underlying source.
    pub fn ocr(context: impl Into<String>) -> Self {
        Self::Ocr {
            context: context.into(),
            source: None,
        }
    }

    /// Creates an OCR engine error wrapping an underlying failure.
    pub fn ocr_with_source(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Ocr {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Wraps an I/O error with the operation it interrupted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
