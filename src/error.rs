//! Error taxonomy for document acquisition and processing.
//!
//! Every variant is caught at the boundary of the operation that raised it and
//! turned into a message for the user. Only [`PipelineError::MissingCredential`]
//! stops a whole batch; the others are confined to a single document.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// URL fetch failed: connection error, timeout, or non-success status.
    #[error("Failed to fetch '{url}': {reason}")]
    Network { url: String, reason: String },

    /// OCR engine call failed or returned no pages.
    #[error("OCR API error: {0}")]
    Ocr(String),

    /// Base64 encoding of the document bytes failed.
    #[error("Failed to encode '{name}': {reason}")]
    Encoding { name: String, reason: String },

    /// Chat engine call failed.
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// A batch was submitted before an API key was set on the session.
    #[error("No API key set for this session")]
    MissingCredential,
}
