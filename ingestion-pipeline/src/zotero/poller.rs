//! Periodic Zotero poll: detect new PDF attachments by filename, hand them
//! to the sync service when auto-sync is on, and nudge the worker.

use std::{sync::Arc, time::Duration};

use tracing::{error, info};

use crate::worker::WorkerHandle;

use super::{client::ZoteroClient, sync::ZoteroSyncService};

/// Poll until the worker handle signals shutdown. Errors are logged and the
/// loop continues with the next tick.
pub async fn run_poller_loop(
    client: Arc<ZoteroClient>,
    sync_service: Arc<ZoteroSyncService>,
    worker: Arc<WorkerHandle>,
    auto_sync: bool,
    poll_interval: Duration,
) {
    if auto_sync {
        info!(
            interval_secs = poll_interval.as_secs(),
            "Zotero poller started, auto-sync enabled"
        );
    } else {
        info!(
            interval_secs = poll_interval.as_secs(),
            "Zotero poller started, auto-sync disabled (manual sync required)"
        );
    }

    while !worker.is_shutdown() {
        tokio::time::sleep(poll_interval).await;
        if worker.is_shutdown() {
            break;
        }

        if let Err(err) = poll_once(&client, &sync_service, &worker, auto_sync).await {
            error!(error = %err, "Zotero poll tick failed");
        }
    }

    info!("Zotero poller stopped");
}

/// One poll tick: enumerate known filenames, list the library and act on new
/// PDF attachments.
pub async fn poll_once(
    client: &ZoteroClient,
    sync_service: &ZoteroSyncService,
    worker: &WorkerHandle,
    auto_sync: bool,
) -> Result<usize, common::error::AppError> {
    if !client.is_enabled() {
        return Ok(0);
    }

    let known_filenames = sync_service.known_filenames().await?;
    let items = client.list_items().await?;

    let new_items: Vec<String> = items
        .iter()
        .filter(|item| item.is_pdf_attachment())
        .filter_map(|item| item.attachment_filename())
        .filter(|filename| !known_filenames.contains(filename))
        .collect();

    for filename in &new_items {
        info!(filename, "new Zotero document detected");
    }

    if auto_sync && !new_items.is_empty() {
        let report = sync_service.sync_new_only().await?;
        if report.queued > 0 {
            info!(queued = report.queued, "triggering worker after Zotero sync");
            worker.trigger();
        }
    }

    Ok(new_items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{db::SurrealDbClient, types::document::Document};
    use httpmock::{Method as MockMethod, MockServer};
    use uuid::Uuid;

    async fn setup(server: &MockServer) -> (Arc<ZoteroClient>, Arc<ZoteroSyncService>, Arc<SurrealDbClient>, tempfile::TempDir) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("db"),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let client = Arc::new(
            ZoteroClient::with_base_url(
                server.base_url(),
                "key".to_string(),
                "7".to_string(),
                "user".to_string(),
            )
            .expect("client"),
        );
        let sync_service = Arc::new(ZoteroSyncService::new(
            Arc::clone(&client),
            Arc::clone(&db),
            dir.path().to_path_buf(),
        ));

        (client, sync_service, db, dir)
    }

    #[tokio::test]
    async fn poll_detects_new_pdfs_and_triggers_worker() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items");
            then.status(200).json_body(serde_json::json!([
                {
                    "key": "NEW",
                    "data": {
                        "key": "NEW",
                        "itemType": "attachment",
                        "filename": "fresh.pdf"
                    }
                }
            ]));
        });
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items/NEW/file");
            then.status(200).body("%PDF-1.4 fake");
        });

        let (client, sync_service, db, _dir) = setup(&server).await;
        let worker = WorkerHandle::new();

        let new_count = poll_once(&client, &sync_service, &worker, true)
            .await
            .expect("poll");
        assert_eq!(new_count, 1);

        // The sync ran: the document row exists and the worker was notified.
        let queued = Document::find_by_filename("fresh.pdf", &db)
            .await
            .expect("lookup");
        assert!(queued.is_some());

        tokio::time::timeout(Duration::from_millis(100), worker.notified())
            .await
            .expect("worker trigger stored");
    }

    #[tokio::test]
    async fn known_documents_are_not_reported_as_new() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items");
            then.status(200).json_body(serde_json::json!([
                {
                    "key": "OLD",
                    "data": {
                        "key": "OLD",
                        "itemType": "attachment",
                        "filename": "known.pdf"
                    }
                }
            ]));
        });

        let (client, sync_service, db, _dir) = setup(&server).await;
        db.store_item(Document::new("known.pdf".to_string(), "/x/known.pdf".to_string()))
            .await
            .expect("store");

        let worker = WorkerHandle::new();
        let new_count = poll_once(&client, &sync_service, &worker, true)
            .await
            .expect("poll");

        assert_eq!(new_count, 0);
    }
}
