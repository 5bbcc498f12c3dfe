// ABOUTME: Completion provider seam — request/response types, the provider trait, and the factory.
// ABOUTME: Responses are either a stream of text deltas or one complete reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::chat::ollama::OllamaClient;
use crate::config::LlmConfig;
use crate::error::ProviderError;

/// Role of a message in a provider payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One entry of the ordered payload sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub images: Vec<Vec<u8>>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// Everything the provider needs for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    /// Structured-output contract, when one is enforced.
    pub format: Option<serde_json::Value>,
}

/// Text deltas of a streaming reply.
pub type DeltaStream = BoxStream<'static, Result<String, ProviderError>>;

/// The provider's answer, polymorphic over the two delivery modes.
pub enum ProviderResponse {
    Stream(DeltaStream),
    Complete(String),
}

impl std::fmt::Debug for ProviderResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("ProviderResponse::Stream(..)"),
            Self::Complete(text) => f.debug_tuple("ProviderResponse::Complete").field(text).finish(),
        }
    }
}

/// A text/vision completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a completion. A streaming request returns [`ProviderResponse::Stream`],
    /// a non-streaming one [`ProviderResponse::Complete`].
    async fn complete(&self, request: &ChatRequest) -> Result<ProviderResponse, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Create a provider client based on the provider name in config.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    match config.provider.as_str() {
        "ollama" => {
            let client = OllamaClient::new(
                &config.ollama.base_url,
                Duration::from_secs(config.request_timeout_seconds),
            )?;
            Ok(Arc::new(client))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_errors() {
        let config = LlmConfig {
            provider: "fakeprovider".to_string(),
            ..Default::default()
        };
        let result = create_client(&config);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("fakeprovider"));
    }

    #[test]
    fn ollama_provider_is_built_in() {
        let client = create_client(&LlmConfig::default()).unwrap();
        assert_eq!(client.name(), "ollama");
    }

    #[test]
    fn message_role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageRole::System).unwrap(),
            "\"system\""
        );
    }
}
