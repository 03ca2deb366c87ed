#![allow(clippy::module_name_repetitions)]
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Prefix for per-document vector collections. The collection name is a pure
/// function of the document id and is never persisted.
pub const COLLECTION_PREFIX: &str = "doc_";

stored_object!(Document, "document", {
    file_name: String,
    file_path: String,
    processed: bool,
    num_chunks: Option<i64>,
    query_enabled: bool,
    parent_store_path: Option<String>
});

impl Document {
    pub fn new(file_name: String, file_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            file_name,
            file_path,
            processed: false,
            num_chunks: None,
            query_enabled: true,
            parent_store_path: None,
        }
    }

    pub fn collection_name(&self) -> String {
        format!("{COLLECTION_PREFIX}{}", self.id)
    }

    /// `true` once ingestion gave up on this document for good.
    pub fn is_failed(&self) -> bool {
        self.num_chunks == Some(-1)
    }

    pub async fn list_recent(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let documents: Vec<Document> = db
            .client
            .query("SELECT * FROM type::table($table_name) ORDER BY created_at DESC")
            .bind(("table_name", Document::table_name()))
            .await?
            .take(0)?;

        Ok(documents)
    }

    pub async fn find_by_filename(
        file_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut result: Vec<Document> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE file_name = $file_name LIMIT 1")
            .bind(("table_name", Document::table_name()))
            .bind(("file_name", file_name.to_string()))
            .await?
            .take(0)?;

        Ok(result.pop())
    }

    /// Next document the worker should ingest. Documents carrying the `-1`
    /// failure sentinel are never handed out again.
    pub async fn next_pending(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut result: Vec<Document> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) \
                 WHERE processed = false \
                 AND (num_chunks = NONE OR num_chunks = NULL OR num_chunks >= 0) \
                 ORDER BY created_at LIMIT 1",
            )
            .bind(("table_name", Document::table_name()))
            .await?
            .take(0)?;

        Ok(result.pop())
    }

    pub async fn mark_processed(
        id: &str,
        num_chunks: i64,
        parent_store_path: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/processed", true))
            .patch(PatchOp::replace("/num_chunks", num_chunks))
            .patch(PatchOp::replace(
                "/parent_store_path",
                parent_store_path.to_string(),
            ))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Terminal failure: `processed = true` with the `-1` sentinel keeps the
    /// worker from retrying forever.
    pub async fn mark_failed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/processed", true))
            .patch(PatchOp::replace("/num_chunks", -1_i64))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Re-queue for ingestion, clearing any previous chunk count so the
    /// worker will pick the document up even after a terminal failure.
    pub async fn requeue(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/processed", false))
            .patch(PatchOp::replace("/num_chunks", Option::<i64>::None))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Startup reconciliation found the backing collection or side-store
    /// missing: the document needs a fresh ingestion pass.
    pub async fn revert_to_pending(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/processed", false))
            .patch(PatchOp::replace("/num_chunks", 0_i64))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn set_query_enabled(
        id: &str,
        query_enabled: bool,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/query_enabled", query_enabled))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Document not found".to_string()))
    }
}
