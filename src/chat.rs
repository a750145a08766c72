//! Chat-completion client used for text normalization.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Anything that can answer a list of chat messages with generated text.
#[async_trait::async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat(&self, messages: Vec<Message>) -> Result<String>;
}

/// Mistral chat completions client.
#[derive(Clone)]
pub struct MistralChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl MistralChatClient {
    pub fn new(
        client: Client,
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", api_base),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl ChatEngine for MistralChatClient {
    async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
        };

        debug!("Sending chat request: model={}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;

        if let Some(usage) = &response.usage {
            info!(
                "Chat response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Chat response contained no choices")
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    #[test]
    fn test_message_serialization() {
        let value = serde_json::to_value(Message::system("regole")).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "regole"}));
    }

    #[tokio::test]
    async fn test_returns_first_choice() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "chat-model");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["role"], "user");
                Json(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "testo pulito"}},
                        {"message": {"role": "assistant", "content": "altro"}}
                    ],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
                }))
            }),
        );
        let base = serve(router).await;

        let client = MistralChatClient::new(Client::new(), &base, "key", "chat-model");
        let text = client
            .chat(vec![Message::system("s"), Message::user("u")])
            .await
            .unwrap();
        assert_eq!(text, "testo pulito");
    }

    #[tokio::test]
    async fn test_error_status() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(router).await;

        let client = MistralChatClient::new(Client::new(), &base, "key", "chat-model");
        let err = client.chat(vec![Message::user("u")]).await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
