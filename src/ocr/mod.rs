//! OCR engine abstraction.
//!
//! Defines the [`OcrProvider`] trait and page type so the pipeline can run
//! against Mistral OCR or a test double.

pub mod mistral;

use crate::input::EncodedPayload;

/// One recognised page as returned by the OCR engine (0-indexed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub index: u32,
    pub markdown: String,
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise every page of the payload, in page order.
    async fn process(&self, payload: &EncodedPayload) -> anyhow::Result<Vec<PageText>>;
}
