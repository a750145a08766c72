//! Builds a document pipeline bound to one session's API key.

use crate::chat::MistralChatClient;
use crate::config::AppConfig;
use crate::ocr::mistral::MistralOcrProvider;
use crate::pipeline::DocumentPipeline;
use std::sync::Arc;

pub trait PipelineFactory: Send + Sync {
    fn build(&self, api_key: &str) -> DocumentPipeline;
}

/// Wires Mistral OCR and Mistral chat with the configured models.
pub struct MistralPipelineFactory {
    client: reqwest::Client,
    config: Arc<AppConfig>,
}

impl MistralPipelineFactory {
    pub fn new(client: reqwest::Client, config: Arc<AppConfig>) -> Self {
        Self { client, config }
    }
}

impl PipelineFactory for MistralPipelineFactory {
    fn build(&self, api_key: &str) -> DocumentPipeline {
        let ocr = MistralOcrProvider::new(
            self.client.clone(),
            &self.config.api_base,
            api_key,
            &self.config.ocr_model,
        );
        let chat = MistralChatClient::new(
            self.client.clone(),
            &self.config.api_base,
            api_key,
            &self.config.chat_model,
        );
        DocumentPipeline::new(Arc::new(ocr), Arc::new(chat))
    }
}
