use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    chat::Chat,
    message::{Message, MessageRole},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatCreate {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chat> for ChatResponse {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

pub async fn create_chat(
    State(state): State<ApiState>,
    Json(input): Json<ChatCreate>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat = Chat::new(input.title);
    state
        .db
        .store_item(chat.clone())
        .await
        .map_err(common::error::AppError::from)?;

    info!(chat_id = %chat.id, title = %chat.title, "created chat");
    Ok(Json(chat.into()))
}

pub async fn list_chats(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ChatResponse>>, ApiError> {
    let chats = Chat::list_recent(&state.db).await?;
    Ok(Json(chats.into_iter().map(ChatResponse::from).collect()))
}

pub async fn get_chat(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat: Option<Chat> = state
        .db
        .get_item(&chat_id)
        .await
        .map_err(common::error::AppError::from)?;

    chat.map(ChatResponse::from)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))
}

pub async fn delete_chat(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Chat::delete_with_messages(&chat_id, &state.db).await?;

    info!(chat_id = %chat_id, "deleted chat");
    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn get_chat_messages(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let chat: Option<Chat> = state
        .db
        .get_item(&chat_id)
        .await
        .map_err(common::error::AppError::from)?;
    if chat.is_none() {
        return Err(ApiError::NotFound("Chat not found".to_string()));
    }

    let messages = Message::list_for_chat(&chat_id, &state.db).await?;
    Ok(Json(
        messages.into_iter().map(MessageResponse::from).collect(),
    ))
}
