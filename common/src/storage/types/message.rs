#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

stored_object!(Message, "message", {
    chat_id: String,
    role: MessageRole,
    content: String
});

impl Message {
    pub fn new(chat_id: String, role: MessageRole, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chat_id,
            role,
            content,
        }
    }

    /// Messages of one chat in conversation order.
    pub async fn list_for_chat(
        chat_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Message> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE chat_id = $chat_id ORDER BY created_at",
            )
            .bind(("table_name", Message::table_name()))
            .bind(("chat_id", chat_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}
