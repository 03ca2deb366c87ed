use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

use super::{ChatMessage, ChatRole, LlmClient, LlmOptions, TokenStream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic uses a dedicated `system` field and its own SSE framing, so it
/// implements the client trait directly instead of the OpenAI-shaped path.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    options: LlmOptions,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, options: LlmOptions) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string(), options)
    }

    pub fn with_base_url(
        api_key: String,
        base_url: String,
        options: LlmOptions,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            options,
        })
    }

    fn build_request(&self, messages: &[ChatMessage], stream: bool) -> MessagesRequest {
        // System turns move into the dedicated field.
        let system: Vec<&str> = messages
            .iter()
            .filter(|message| message.role == ChatRole::System)
            .map(|message| message.content.as_str())
            .collect();

        let wire_messages = messages
            .iter()
            .filter(|message| message.role != ChatRole::System)
            .map(|message| WireMessage {
                role: match message.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                },
                content: message.content.clone(),
            })
            .collect();

        MessagesRequest {
            model: self.options.model.clone(),
            max_tokens: self.options.max_tokens,
            messages: wire_messages,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            temperature: self.options.temperature,
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Anthropic request failed with {status}: {detail}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let body = self.build_request(messages, false);

        let response = tokio::time::timeout(self.options.timeout, self.send(&body))
            .await
            .map_err(|_| AppError::Llm("Anthropic request timed out".to_string()))??;

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AppError::Llm("No content in Anthropic response".to_string()));
        }

        Ok(text)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
        let body = self.build_request(messages, true);

        let response = tokio::time::timeout(self.options.timeout, self.send(&body))
            .await
            .map_err(|_| AppError::Llm("Anthropic stream setup timed out".to_string()))??;

        let mut bytes = response.bytes_stream();

        let tokens = stream! {
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Err(err) => {
                        yield Err(AppError::from(err));
                        return;
                    }
                }

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };

                    if let Some(text) = extract_text_delta(data.trim()) {
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                }
            }
        };

        Ok(Box::pin(tokens))
    }
}

/// Pull the text out of a `content_block_delta` SSE payload; other event
/// kinds carry no answer tokens.
fn extract_text_delta(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;

    if value.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return None;
    }

    value
        .get("delta")
        .and_then(|delta| delta.get("text"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
