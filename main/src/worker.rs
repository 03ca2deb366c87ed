//! Worker-only entry point: startup reconciliation, the ingestion loop and
//! the Zotero poller, without the HTTP surface.

use std::{sync::Arc, time::Duration};

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
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
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

    reconcile_documents(&db, &vector_store).await?;

    let status = StatusRegistry::new();
    let worker_handle = WorkerHandle::new();

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&db),
        Arc::clone(&vector_store),
        MetadataExtractor::new(config.use_llm_metadata_extraction, Arc::clone(&llm)),
        Arc::clone(&status),
        config.clone(),
    ));

    let zotero_client = Arc::new(ZoteroClient::from_config(&config)?);
    let zotero_sync = Arc::new(ZoteroSyncService::new(
        Arc::clone(&zotero_client),
        Arc::clone(&db),
        config.zotero_download_dir(),
    ));
    tokio::spawn(run_poller_loop(
        zotero_client,
        zotero_sync,
        Arc::clone(&worker_handle),
        config.zotero_auto_sync,
        Duration::from_secs(config.zotero_poll_interval_secs),
    ));

    info!("Starting worker process");
    run_worker_loop(
        db,
        pipeline,
        status,
        worker_handle,
        Duration::from_secs(config.worker_check_interval_secs),
    )
    .await;

    Ok(())
}
