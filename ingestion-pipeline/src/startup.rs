//! Startup reconciliation between the document table, the vector store and
//! the parent side-store. After this pass the set of prefix-matching
//! collections equals exactly the documents that exist.

use std::{collections::HashSet, path::Path, sync::Arc};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, parent_store, types::document::Document},
    vector::VectorStore,
};
use tracing::{info, warn};

/// Revert processed documents whose backing state went missing and drop
/// collections that no longer belong to any document.
pub async fn reconcile_documents(
    db: &Arc<SurrealDbClient>,
    vector_store: &Arc<VectorStore>,
) -> Result<(), AppError> {
    let documents = Document::list_recent(db).await?;

    for document in &documents {
        if !document.processed || document.is_failed() {
            continue;
        }

        let collection_name = vector_store.collection_name_for_document(&document.id);
        let collection_ok = vector_store
            .collection_exists(&collection_name)
            .await
            .unwrap_or(false);
        let side_store_ok = document
            .parent_store_path
            .as_deref()
            .map(|path| parent_store::exists(Path::new(path)))
            .unwrap_or(false);

        if !collection_ok || !side_store_ok {
            warn!(
                doc_id = %document.id,
                file_name = %document.file_name,
                collection_ok,
                side_store_ok,
                "processed document lost backing state, reverting to pending"
            );
            Document::revert_to_pending(&document.id, db).await?;
        }
    }

    let valid_collections: HashSet<String> = documents
        .iter()
        .map(|document| vector_store.collection_name_for_document(&document.id))
        .collect();
    vector_store
        .cleanup_orphaned_collections(&valid_collections)
        .await?;

    info!(documents = documents.len(), "startup reconciliation complete");
    Ok(())
}
