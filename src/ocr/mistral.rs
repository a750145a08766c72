//! Mistral OCR provider (uses Mistral's OCR API).

use super::{OcrProvider, PageText};
use crate::input::EncodedPayload;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub struct MistralOcrProvider {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl MistralOcrProvider {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: format!("{}/ocr", api_base),
            model: model.into(),
            client,
        }
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentSource<'a>,
    include_image_base64: bool,
}

/// Images and PDFs both travel as an `image_url` data URI.
#[derive(Serialize)]
#[serde(tag = "type")]
enum DocumentSource<'a> {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: &'a str },
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    index: u32,
    #[serde(default)]
    markdown: String,
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    fn name(&self) -> &str {
        "mistral_ocr"
    }

    async fn process(&self, payload: &EncodedPayload) -> anyhow::Result<Vec<PageText>> {
        let body = OcrRequest {
            model: &self.model,
            document: DocumentSource::ImageUrl {
                image_url: payload.as_str(),
            },
            include_image_base64: false,
        };

        info!("MistralOcrProvider: calling OCR API (model={}, payload={})", self.model, payload);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mistral OCR API error ({}): {}", status, text);
        }

        let raw_text = resp.text().await?;
        debug!(
            "MistralOcrProvider: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );
        let ocr: OcrResponse = serde_json::from_str(&raw_text)?;

        let mut pages: Vec<PageText> = ocr
            .pages
            .into_iter()
            .map(|p| PageText {
                index: p.index,
                markdown: p.markdown,
            })
            .collect();
        pages.sort_by_key(|p| p.index);

        Ok(pages)
    }
}
