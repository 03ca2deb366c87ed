//! LLM provider capability: `invoke` for one-shot completions and `stream`
//! for token streaming. Anthropic, OpenAI and Ollama all implement the same
//! trait; callers never see provider-specific types.

mod anthropic;
mod ollama;
mod openai;

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    utils::config::{AppConfig, LlmProvider},
};

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion: all messages in, full response text out.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AppError>;

    /// Token stream for the same message list. The stream is finite and not
    /// restartable.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, AppError>;
}

/// Shared knobs every provider honours.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }
}

/// Build the configured provider, honouring the active-provider fallback.
pub fn build_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>, AppError> {
    let options = LlmOptions::from_config(config);

    let client: Arc<dyn LlmClient> = match config.active_provider() {
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(
            config.anthropic_api_key.clone(),
            options,
        )?),
        LlmProvider::OpenAI => Arc::new(OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            options,
        )),
        LlmProvider::Ollama => {
            Arc::new(OllamaClient::new(config.ollama_base_url.clone(), options)?)
        }
    };

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let serialized = serde_json::to_string(&ChatRole::Assistant).expect("serialize");
        assert_eq!(serialized, "\"assistant\"");
    }
}
