//! HTTP-only entry point: serves the API without the in-process worker and
//! poller, for deployments that run the worker binary separately.

use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use common::{
    llm::build_llm_client,
    observability::StatusRegistry,
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingService},
    vector::VectorStore,
};
use ingestion_pipeline::{
    worker::WorkerHandle,
    zotero::{client::ZoteroClient, sync::ZoteroSyncService},
};
use retrieval_pipeline::{reranking::RerankerPool, RagEngine, Reranker};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    config.ensure_directories()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let embedder = Arc::new(EmbeddingService::from_config(&config)?);
    embedder.warmup().await?;

    let vector_store = Arc::new(VectorStore::new(&config, Arc::clone(&embedder))?);
    let llm = build_llm_client(&config)?;
    let reranker: Arc<dyn Reranker> = RerankerPool::from_config(&config)?;

    let rag_engine = Arc::new(RagEngine::new(
        Arc::clone(&db),
        Arc::clone(&vector_store),
        Arc::clone(&llm),
        Arc::clone(&reranker),
        config.clone(),
    ));

    let zotero_client = Arc::new(ZoteroClient::from_config(&config)?);
    let zotero_sync = Arc::new(ZoteroSyncService::new(
        Arc::clone(&zotero_client),
        Arc::clone(&db),
        config.zotero_download_dir(),
    ));

    let state = ApiState {
        db,
        config: config.clone(),
        vector_store,
        rag_engine,
        status: StatusRegistry::new(),
        worker: WorkerHandle::new(),
        zotero_client,
        zotero_sync,
    };
    let app = api_routes(state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
