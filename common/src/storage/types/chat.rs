#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;

stored_object!(Chat, "chat", {
    title: String
});

impl Chat {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
        }
    }

    /// All chats, most recently updated first.
    pub async fn list_recent(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let chats: Vec<Chat> = db
            .client
            .query("SELECT * FROM type::table($table_name) ORDER BY updated_at DESC")
            .bind(("table_name", Chat::table_name()))
            .await?
            .take(0)?;

        Ok(chats)
    }

    /// Bump `updated_at` so the chat list reflects recent activity.
    pub async fn touch(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Delete the chat and cascade to its messages.
    pub async fn delete_with_messages(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let chat: Option<Chat> = db.delete_item(id).await?;
        let chat = chat.ok_or_else(|| AppError::NotFound("Chat not found".to_string()))?;

        db.client
            .query("DELETE FROM type::table($table_name) WHERE chat_id = $chat_id")
            .bind(("table_name", Message::table_name()))
            .bind(("chat_id", id.to_string()))
            .await?;

        Ok(chat)
    }
}
