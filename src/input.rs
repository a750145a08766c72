//! Input normalization: turn uploads and remote URLs into a uniform
//! base64 `data:` URI payload for the OCR engine.

use crate::error::PipelineError;
use base64::{engine::general_purpose::STANDARD as BASE64, write::EncoderStringWriter, Engine as _};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

/// Name given to URL documents whose path has no usable segment.
pub const URL_PLACEHOLDER_NAME: &str = "url-document";

/// Supported document media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "application/pdf")]
    Pdf,
}

/// Coarse document kind. Encoding and OCR submission are identical for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Pdf,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::Jpeg | Self::Png => DocumentKind::Image,
            Self::Pdf => DocumentKind::Pdf,
        }
    }

    /// Parse a MIME type string, ignoring parameters such as `; charset=...`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Match on a file name or path by its extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as acquired, before encoding.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
}

/// Build a document from an upload. The declared media type is trusted as-is.
pub fn acquire_from_upload(
    name: impl Into<String>,
    bytes: Vec<u8>,
    declared_media_type: MediaType,
) -> SourceDocument {
    SourceDocument {
        name: name.into(),
        bytes,
        media_type: declared_media_type,
    }
}

/// Media type for an uploaded part: the declared content type when it is a
/// supported one, else the file name's extension.
pub fn upload_media_type(declared: Option<&str>, file_name: &str) -> Option<MediaType> {
    declared
        .and_then(MediaType::from_mime)
        .or_else(|| MediaType::from_extension(file_name))
}

/// Fetch a document over HTTP GET.
///
/// The media type comes from the URL extension first, then a supported
/// `Content-Type` header, then defaults to PDF.
pub async fn acquire_from_url(
    client: &reqwest::Client,
    raw_url: &str,
    timeout: Duration,
) -> Result<SourceDocument, PipelineError> {
    let network = |reason: String| PipelineError::Network {
        url: raw_url.to_string(),
        reason,
    };

    let url = Url::parse(raw_url.trim()).map_err(|e| network(format!("invalid URL: {}", e)))?;

    info!("Fetching document from {}", url);

    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                network(format!("timed out after {}s", timeout.as_secs_f32()))
            } else {
                network(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(network(format!("HTTP {}", status)));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| network(e.to_string()))?
        .to_vec();

    let media_type = resolve_media_type(&url, content_type.as_deref());
    let name = name_from_url(&url);

    debug!(
        "Fetched {} ({} bytes, content-type={:?}, resolved={})",
        name,
        bytes.len(),
        content_type,
        media_type
    );

    Ok(SourceDocument {
        name,
        bytes,
        media_type,
    })
}

/// Resolve the media type of a fetched document.
///
/// Server content types are unreliable, so a recognised extension wins.
pub fn resolve_media_type(url: &Url, content_type: Option<&str>) -> MediaType {
    MediaType::from_extension(url.path())
        .or_else(|| content_type.and_then(MediaType::from_mime))
        .unwrap_or(MediaType::Pdf)
}

/// Last non-empty path segment, percent-decoded, or [`URL_PLACEHOLDER_NAME`].
pub fn name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            let decoded = urlencoding::decode_binary(segment.as_bytes());
            String::from_utf8_lossy(&decoded).trim().to_string()
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| URL_PLACEHOLDER_NAME.to_string())
}

/// A `data:<media-type>;base64,<data>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload(String);

impl EncodedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the payload back into its media type and raw bytes.
    pub fn decode(&self) -> Option<(MediaType, Vec<u8>)> {
        let rest = self.0.strip_prefix("data:")?;
        let (mime, data) = rest.split_once(";base64,")?;
        let media_type = MediaType::from_mime(mime)?;
        let bytes = BASE64.decode(data).ok()?;
        Some((media_type, bytes))
    }
}

impl fmt::Display for EncodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads can be megabytes; show only the header.
        let header = self.0.split_once(',').map(|(h, _)| h).unwrap_or(&self.0);
        write!(f, "{},<{} chars>", header, self.0.len())
    }
}

/// Base64-encode a document into a `data:` URI.
pub fn encode(doc: &SourceDocument) -> Result<EncodedPayload, PipelineError> {
    let prefix = format!("data:{};base64,", doc.media_type);
    let mut writer = EncoderStringWriter::from_consumer(prefix, &BASE64);
    writer
        .write_all(&doc.bytes)
        .map_err(|e| PipelineError::Encoding {
            name: doc.name.clone(),
            reason: e.to_string(),
        })?;
    Ok(EncodedPayload(writer.into_inner()))
}
