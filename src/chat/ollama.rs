// ABOUTME: Ollama chat client — posts to /api/chat and decodes NDJSON streaming frames.
// ABOUTME: Images travel base64-encoded; the response format carries the structured-output schema.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::provider::{
    ChatMessage, ChatRequest, CompletionProvider, DeltaStream, MessageRole, ProviderResponse,
};
use crate::error::ProviderError;

/// Client for a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

/// Message in Ollama's chat format.
#[derive(Debug, Serialize, PartialEq)]
struct OllamaMessage {
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

/// Ollama chat request body.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
}

/// One response frame. Streaming replies are a sequence of these, one per line.
#[derive(Debug, Deserialize)]
struct OllamaChatFrame {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role,
                content: msg.content.clone(),
                images: msg.images.iter().map(|img| BASE64.encode(img)).collect(),
            })
            .collect()
    }

    async fn post(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending chat request"
        );

        let body = OllamaChatRequest {
            model: &request.model,
            messages: Self::convert_messages(&request.messages),
            stream: request.stream,
            format: request.format.as_ref(),
        };
        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Api { status, body });
        }
        Ok(response)
    }
}

/// Decode one NDJSON line into its text delta, if it carries any.
fn parse_frame(line: &[u8]) -> Result<Option<String>, ProviderError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }
    let frame: OllamaChatFrame = serde_json::from_slice(line)?;
    if let Some(error) = frame.error {
        return Err(ProviderError::Stream(error));
    }
    Ok(frame
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty()))
}

/// Reassemble NDJSON frames across network chunk boundaries.
fn delta_frames(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static {
    let mut chunks = Box::pin(response.bytes_stream());
    try_stream! {
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if let Some(delta) = parse_frame(&line)? {
                    yield delta;
                }
            }
        }
        if let Some(delta) = parse_frame(&buf)? {
            yield delta;
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self.post(request).await?;
        if request.stream {
            let stream: DeltaStream = Box::pin(delta_frames(response));
            return Ok(ProviderResponse::Stream(stream));
        }

        let bytes = response.bytes().await?;
        let frame: OllamaChatFrame = serde_json::from_slice(&bytes)?;
        if let Some(error) = frame.error {
            return Err(ProviderError::Stream(error));
        }
        Ok(ProviderResponse::Complete(
            frame.message.map(|m| m.content).unwrap_or_default(),
        ))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
