use std::{sync::Arc, time::Duration};

use api_router::{api_routes, api_state::ApiState};
use common::{
    llm::build_llm_client,
    observability::StatusRegistry,
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingService},
    vector::VectorStore,
};
use ingestion_pipeline::{
    metadata::MetadataExtractor,
    pipeline::IngestPipeline,
    run_worker_loop,
    startup::reconcile_documents,
    worker::WorkerHandle,
    zotero::{client::ZoteroClient, poller::run_poller_loop, sync::ZoteroSyncService},
};
use retrieval_pipeline::{reranking::RerankerPool, RagEngine, Reranker};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
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

    // Embedding encoder, forced to load before traffic arrives.
    let embedder = Arc::new(EmbeddingService::from_config(&config)?);
    embedder.warmup().await?;
    info!(dimension = embedder.dimension(), "embedding service ready");

    let vector_store = Arc::new(VectorStore::new(&config, Arc::clone(&embedder))?);

    let llm = build_llm_client(&config)?;
    info!(provider = %config.active_provider(), "LLM provider selected");

    let reranker: Arc<dyn Reranker> = RerankerPool::from_config(&config)?;

    let rag_engine = Arc::new(RagEngine::new(
        Arc::clone(&db),
        Arc::clone(&vector_store),
        Arc::clone(&llm),
        Arc::clone(&reranker),
        config.clone(),
    ));

    let status = StatusRegistry::new();
    let worker_handle = WorkerHandle::new();

    let zotero_client = Arc::new(ZoteroClient::from_config(&config)?);
    let zotero_sync = Arc::new(ZoteroSyncService::new(
        Arc::clone(&zotero_client),
        Arc::clone(&db),
        config.zotero_download_dir(),
    ));

    // Bring persisted state, side-stores and collections back in line.
    reconcile_documents(&db, &vector_store).await?;

    // Background ingestion worker.
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&db),
        Arc::clone(&vector_store),
        MetadataExtractor::new(config.use_llm_metadata_extraction, Arc::clone(&llm)),
        Arc::clone(&status),
        config.clone(),
    ));
    tokio::spawn(run_worker_loop(
        Arc::clone(&db),
        pipeline,
        Arc::clone(&status),
        Arc::clone(&worker_handle),
        Duration::from_secs(config.worker_check_interval_secs),
    ));

    // Zotero poller.
    tokio::spawn(run_poller_loop(
        Arc::clone(&zotero_client),
        Arc::clone(&zotero_sync),
        Arc::clone(&worker_handle),
        config.zotero_auto_sync,
        Duration::from_secs(config.zotero_poll_interval_secs),
    ));

    let state = ApiState {
        db,
        config: config.clone(),
        vector_store,
        rag_engine,
        status,
        worker: Arc::clone(&worker_handle),
        zotero_client,
        zotero_sync,
    };
    let app = api_routes(state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(worker_handle))
        .await?;

    Ok(())
}

async fn shutdown_signal(worker_handle: Arc<WorkerHandle>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install shutdown handler");
        return;
    }

    info!("shutdown signal received, stopping background services");
    worker_handle.shutdown();
}
