use std::sync::Arc;

use common::{
    observability::StatusRegistry, storage::db::SurrealDbClient, utils::config::AppConfig,
    vector::VectorStore,
};
use ingestion_pipeline::{
    worker::WorkerHandle,
    zotero::{client::ZoteroClient, sync::ZoteroSyncService},
};
use retrieval_pipeline::RagEngine;

/// Everything the HTTP handlers need, cloned per request.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub vector_store: Arc<VectorStore>,
    pub rag_engine: Arc<RagEngine>,
    pub status: Arc<StatusRegistry>,
    pub worker: Arc<WorkerHandle>,
    pub zotero_client: Arc<ZoteroClient>,
    pub zotero_sync: Arc<ZoteroSyncService>,
}
