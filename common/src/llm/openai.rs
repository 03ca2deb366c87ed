use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;

use crate::error::AppError;

use super::{ChatMessage, ChatRole, LlmClient, LlmOptions, TokenStream};

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    options: LlmOptions,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, options: LlmOptions) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(base_url),
        );

        Self { client, options }
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let converted: Vec<ChatCompletionRequestMessage> = messages
            .iter()
            .map(|message| match message.role {
                ChatRole::System => Ok(ChatCompletionRequestSystemMessage::from(
                    message.content.clone(),
                )
                .into()),
                ChatRole::User => Ok(ChatCompletionRequestUserMessage::from(
                    message.content.clone(),
                )
                .into()),
                ChatRole::Assistant => Ok(ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()?
                    .into()),
            })
            .collect::<Result<_, AppError>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.options.model)
            .messages(converted)
            .temperature(self.options.temperature)
            .max_tokens(self.options.max_tokens)
            .build()?;

        Ok(request)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let request = self.build_request(messages)?;

        let response = tokio::time::timeout(
            self.options.timeout,
            self.client.chat().create(request),
        )
        .await
        .map_err(|_| AppError::Llm("OpenAI request timed out".to_string()))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Llm("No content in OpenAI response".to_string()))?;

        Ok(content)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
        let request = self.build_request(messages)?;

        let stream = tokio::time::timeout(
            self.options.timeout,
            self.client.chat().create_stream(request),
        )
        .await
        .map_err(|_| AppError::Llm("OpenAI stream setup timed out".to_string()))??;

        let tokens = stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(err) => Some(Err(AppError::from(err))),
            }
        });

        Ok(Box::pin(tokens))
    }
}
