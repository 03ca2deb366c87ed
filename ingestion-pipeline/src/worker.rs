//! Background ingestion worker: wakes on a timer or an explicit trigger,
//! drains all pending documents one at a time, and never revisits documents
//! carrying the terminal failure sentinel.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{
    error::AppError,
    observability::StatusRegistry,
    storage::{db::SurrealDbClient, types::document::Document},
};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::pipeline::IngestPipeline;

/// Wakeup and shutdown handle shared with upload handlers, the Zotero sync
/// and the lifecycle code. `trigger` is callable from any context.
#[derive(Default)]
pub struct WorkerHandle {
    notify: Notify,
    shutdown: AtomicBool,
}

impl WorkerHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the worker for an immediate pass. Safe from sync and async code.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next trigger. A trigger sent while nobody was waiting is
    /// stored and resolves the next call immediately.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Worker loop: one initial pass, then wake on trigger or timer. Shutdown is
/// honoured at iteration boundaries so an in-flight document completes.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<IngestPipeline>,
    status: Arc<StatusRegistry>,
    handle: Arc<WorkerHandle>,
    check_interval: Duration,
) {
    info!(
        interval_secs = check_interval.as_secs(),
        "document processing worker started"
    );

    if let Err(err) = process_pending_documents(&db, &pipeline, &status, &handle).await {
        error!(error = %err, "initial pending-document pass failed");
    }

    while !handle.is_shutdown() {
        tokio::select! {
            () = handle.notified() => {
                info!("worker woken by trigger");
            }
            () = tokio::time::sleep(check_interval) => {}
        }

        if handle.is_shutdown() {
            break;
        }

        if let Err(err) = process_pending_documents(&db, &pipeline, &status, &handle).await {
            error!(error = %err, "pending-document pass failed");
        }
    }

    info!("document processing worker stopped");
}

/// Drain the pending queue, one document at a time.
pub async fn process_pending_documents(
    db: &SurrealDbClient,
    pipeline: &IngestPipeline,
    status: &StatusRegistry,
    handle: &WorkerHandle,
) -> Result<usize, AppError> {
    let mut processed_count = 0usize;

    loop {
        let Some(pending) = Document::next_pending(db).await? else {
            break;
        };

        // Refresh before processing: another path may have finished it.
        let Some(document) = db.get_item::<Document>(&pending.id).await? else {
            continue;
        };
        if document.processed {
            continue;
        }

        status.set_currently_processing(&document.id);

        let file_path = Path::new(&document.file_path);
        if file_path.exists() {
            match pipeline.process_document(&document, file_path).await {
                Ok(processed) => {
                    processed_count += 1;
                    info!(
                        doc_id = %processed.id,
                        chunks = processed.num_chunks.unwrap_or_default(),
                        "worker finished document"
                    );
                }
                Err(err) => {
                    // The pipeline already marked the terminal failure.
                    error!(doc_id = %document.id, error = %err, "worker failed document");
                }
            }
        } else {
            warn!(
                doc_id = %document.id,
                path = %document.file_path,
                "source file missing, marking document failed"
            );
            Document::mark_failed(&document.id, db).await?;
        }

        status.clear_currently_processing();

        if handle.is_shutdown() {
            break;
        }
    }

    Ok(processed_count)
}
