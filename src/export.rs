//! Markdown downloads of raw and normalized text.

use crate::pipeline::DocumentResult;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Raw OCR transcription.
    Ocr,
    /// Normalized text.
    Norm,
}

impl ExportKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Norm => "norm",
        }
    }

    pub fn body<'a>(&self, result: &'a DocumentResult) -> &'a str {
        match self {
            Self::Ocr => &result.raw_text,
            Self::Norm => &result.normalized_text,
        }
    }
}

/// `<document>_ocr.md` or `<document>_norm.md`.
pub fn export_file_name(document: &str, kind: ExportKind) -> String {
    format!("{}_{}.md", document, kind.suffix())
}

/// Content-Disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Build the download response for one side of a result.
pub fn markdown_download(document: &str, result: &DocumentResult, kind: ExportKind) -> Response {
    if let Some(error) = &result.error {
        return (StatusCode::CONFLICT, error.clone()).into_response();
    }

    let file_name = export_file_name(document, kind);
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(MARKDOWN_CONTENT_TYPE)),
            (header::CONTENT_DISPOSITION, content_disposition(&file_name)),
        ],
        kind.body(result).to_string(),
    )
        .into_response()
}
