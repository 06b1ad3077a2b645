//! Language model integration over an OpenAI-compatible chat API

use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Embedding response
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Trait for language model operations
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text from a conversation
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;

    /// Generate embeddings for text
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;

    /// Name of the configured generation model
    fn model(&self) -> &str;
}

/// OpenAI-compatible chat client with bounded retry
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl HttpLlmClient {
    /// Create a new client from configuration
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        builder
    }

    /// Bounded exponential backoff delay for the given attempt (0-based)
    fn backoff_delay(attempt: u32) -> Duration {
        let secs = 1u64 << attempt.min(4);
        Duration::from_secs(secs)
    }

    async fn chat_once(&self, messages: &[Message]) -> Result<GenerationResponse> {
        let request = ChatRequest {
            model: &self.config.text_model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let url = self.api_url("chat/completions");
        debug!("Making chat request to: {}", url);

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.request(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Chat API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        info!(
            "Generated {} tokens",
            chat_response
                .usage
                .as_ref()
                .and_then(|u| u.completion_tokens)
                .unwrap_or(0)
        );

        Ok(GenerationResponse {
            text: choice.message.content,
            tokens_used: chat_response.usage.and_then(|u| u.completion_tokens),
            model: chat_response.model,
            finish_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        debug!("Generating text with {} messages", messages.len());

        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            match self.chat_once(messages).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    last_error = e.to_string();
                    let delay = Self::backoff_delay(attempt);
                    warn!(
                        "Chat attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        last_error,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.config.max_retries + 1,
            last_error,
        }
        .into())
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        debug!("Generating embedding for text of length {}", text.len());

        let request = EmbedRequest {
            model: &self.config.embedding_model,
            input: text,
        };

        let url = self.api_url("embeddings");

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.request(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Embedding API error: {}", error_text);
            return Err(LlmError::EmbeddingFailed(error_text).into());
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let embedding = embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::InvalidResponse("No embedding in response".to_string()))?;

        debug!("Generated embedding with dimension {}", embedding.len());

        Ok(EmbeddingResponse {
            embedding,
            model: self.config.embedding_model.clone(),
        })
    }

    fn model(&self) -> &str {
        &self.config.text_model
    }
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Helper function to create an assistant message
pub fn assistant_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::Assistant,
        content: content.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    mock! {
        pub Llm {}

        #[async_trait]
        impl LlmClient for Llm {
            async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;
            async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;
            fn model(&self) -> &str;
        }
    }

    fn test_config(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            timeout: 2,
            max_retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_message_creation() {
        let system_msg = system_message("You are a construction QA assistant");
        assert_eq!(system_msg.role, Role::System);

        let user_msg = user_message("C30 混凝土强度");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "C30 混凝土强度");
    }

    #[test]
    fn test_backoff_is_bounded() {
        assert_eq!(HttpLlmClient::backoff_delay(0), Duration::from_secs(1));
        assert_eq!(HttpLlmClient::backoff_delay(1), Duration::from_secs(2));
        assert_eq!(HttpLlmClient::backoff_delay(10), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "qwen2.5",
                "choices": [{
                    "message": {"role": "assistant", "content": "C30 表示立方体抗压强度标准值为 30MPa。"},
                    "finish_reason": "stop"
                }],
                "usage": {"completion_tokens": 18}
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(test_config(format!("{}/v1", server.uri()))).unwrap();
        let response = client
            .generate(&[user_message("C30 是什么强度等级？")])
            .await
            .unwrap();

        assert!(response.text.contains("30MPa"));
        assert_eq!(response.tokens_used, Some(18));
    }

    #[tokio::test]
    async fn test_embed_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(test_config(format!("{}/v1", server.uri()))).unwrap();
        let response = client.embed("框架梁").await.unwrap();

        assert_eq!(response.embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_mocked_client_for_consumers() {
        let mut mock = MockLlm::new();
        mock.expect_generate().times(1).returning(|_| {
            Ok(GenerationResponse {
                text: "C30 表示抗压强度标准值 30MPa。".to_string(),
                tokens_used: Some(12),
                model: "mock".to_string(),
                finish_reason: Some("stop".to_string()),
            })
        });

        let response = mock.generate(&[user_message("C30?")]).await.unwrap();
        assert!(response.text.contains("30MPa"));
    }

    #[tokio::test]
    async fn test_generation_error_surfaces() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(test_config(format!("{}/v1", server.uri()))).unwrap();
        let result = client.generate(&[user_message("hello")]).await;
        assert!(result.is_err());
    }
}
