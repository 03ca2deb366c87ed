use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::{ChatMessage, ChatRole, LlmClient, LlmOptions, TokenStream};

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    options: LlmOptions,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, options: LlmOptions) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().build().map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            options,
        })
    }

    fn build_request(&self, messages: &[ChatMessage], stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: match message.role {
                        ChatRole::System => "system",
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    content: message.content.clone(),
                })
                .collect(),
            stream,
            options: RequestOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "Ollama request failed with {status}: {detail}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let body = self.build_request(messages, false);

        let response = tokio::time::timeout(self.options.timeout, self.send(&body))
            .await
            .map_err(|_| AppError::Llm("Ollama request timed out".to_string()))??;

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .message
            .map(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::Llm("No content in Ollama response".to_string()))?;

        Ok(content)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
        let body = self.build_request(messages, true);

        let response = tokio::time::timeout(self.options.timeout, self.send(&body))
            .await
            .map_err(|_| AppError::Llm("Ollama stream setup timed out".to_string()))??;

        let mut bytes = response.bytes_stream();

        // Ollama streams newline-delimited JSON objects.
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

                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<ChatResponse>(&line) {
                        Ok(parsed) => {
                            if let Some(message) = parsed.message {
                                if !message.content.is_empty() {
                                    yield Ok(message.content);
                                }
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(err) => {
                            yield Err(AppError::Llm(format!(
                                "Malformed Ollama stream line: {err}"
                            )));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn test_options() -> LlmOptions {
        LlmOptions {
            model: "llama2".to_string(),
            temperature: 0.7,
            max_tokens: 64,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn invoke_returns_message_content() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/api/chat");
                then.status(200).json_body(serde_json::json!({
                    "model": "llama2",
                    "message": {"role": "assistant", "content": "Servus"},
                    "done": true
                }));
            })
            .await;

        let client = OllamaClient::new(server.base_url(), test_options()).expect("client");
        let answer = client
            .invoke(&[ChatMessage::user("hi")])
            .await
            .expect("invoke");

        mock.assert_async().await;
        assert_eq!(answer, "Servus");
    }

    #[tokio::test]
    async fn stream_yields_tokens_until_done() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"Hal"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
            "\n",
        );

        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/api/chat");
                then.status(200).body(body);
            })
            .await;

        let client = OllamaClient::new(server.base_url(), test_options()).expect("client");
        let stream = client
            .stream(&[ChatMessage::user("hi")])
            .await
            .expect("stream");

        let tokens: Vec<String> = stream
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await;

        assert_eq!(tokens, vec!["Hal".to_string(), "lo".to_string()]);
    }
}
