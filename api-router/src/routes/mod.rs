pub mod chats;
pub mod documents;
pub mod health;
pub mod query_stream;
pub mod zotero;
