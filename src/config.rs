//! Service configuration.
//!
//! Values come from the process environment (a `.env` file is loaded first if
//! present). The API key is deliberately absent: it is supplied per session.

use anyhow::{Context, Result};
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_API_BASE: &str = "https://api.mistral.ai/v1";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";
pub const DEFAULT_CHAT_MODEL: &str = "mistral-large-latest";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_UPLOAD_MB: usize = 100;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Base URL shared by the OCR and chat endpoints.
    pub api_base: String,
    pub ocr_model: String,
    pub chat_model: String,
    /// Bounds only the URL acquisition path.
    pub fetch_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    /// for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let fetch_timeout = match lookup("URL_FETCH_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid URL_FETCH_TIMEOUT_SECS: {:?}", raw))?,
            ),
            None => defaults.fetch_timeout,
        };

        let max_upload_bytes = match lookup("MAX_UPLOAD_MB") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid MAX_UPLOAD_MB: {:?}", raw))?
                .checked_mul(1024 * 1024)
                .with_context(|| format!("MAX_UPLOAD_MB too large: {:?}", raw))?,
            None => defaults.max_upload_bytes,
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            api_base: lookup("MISTRAL_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            ocr_model: lookup("OCR_MODEL").unwrap_or(defaults.ocr_model),
            chat_model: lookup("CHAT_MODEL").unwrap_or(defaults.chat_model),
            fetch_timeout,
            max_upload_bytes,
        })
    }
}
