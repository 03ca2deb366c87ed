//! Zotero sync: download new PDF attachments into the staging directory and
//! enqueue Document rows for the worker. Sync never processes documents
//! itself.

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
use serde::Serialize;
use tracing::{error, info, warn};

use super::client::{ZoteroClient, ZoteroItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Queued,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemOutcome {
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub queued: usize,
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<SyncItemOutcome>,
}

impl SyncReport {
    fn record(&mut self, outcome: SyncItemOutcome) {
        match outcome.status {
            SyncStatus::Queued => self.queued += 1,
            SyncStatus::Skipped => self.skipped += 1,
            SyncStatus::Failed => self.failed += 1,
        }
        self.details.push(outcome);
    }
}

pub struct ZoteroSyncService {
    client: Arc<ZoteroClient>,
    db: Arc<SurrealDbClient>,
    download_dir: PathBuf,
}

impl ZoteroSyncService {
    pub fn new(client: Arc<ZoteroClient>, db: Arc<SurrealDbClient>, download_dir: PathBuf) -> Self {
        Self {
            client,
            db,
            download_dir,
        }
    }

    /// Sync every library item, re-queueing unprocessed known documents.
    pub async fn sync_all(&self) -> Result<SyncReport, AppError> {
        self.sync_items(false).await
    }

    /// Sync only items whose filename is not yet known to the document table.
    pub async fn sync_new_only(&self) -> Result<SyncReport, AppError> {
        self.sync_items(true).await
    }

    async fn sync_items(&self, new_only: bool) -> Result<SyncReport, AppError> {
        let mut report = SyncReport::default();

        if !self.client.is_enabled() {
            warn!("Zotero sync requested but the integration is not configured");
            return Ok(report);
        }

        let items = self.client.list_items().await?;
        info!(items = items.len(), new_only, "starting Zotero sync");

        for item in items {
            let outcome = self.sync_single_item(&item, new_only).await;
            report.record(outcome);
        }

        info!(
            queued = report.queued,
            skipped = report.skipped,
            failed = report.failed,
            "Zotero sync complete"
        );

        Ok(report)
    }

    async fn sync_single_item(&self, item: &ZoteroItem, new_only: bool) -> SyncItemOutcome {
        let item_key = item.item_key();

        if !item.is_attachment() {
            return SyncItemOutcome {
                status: SyncStatus::Skipped,
                reason: Some("not_attachment".to_string()),
                item_key,
                filename: None,
                doc_id: None,
            };
        }

        let filename = item
            .attachment_filename()
            .unwrap_or_else(|| "unknown.pdf".to_string());

        if !filename.to_lowercase().ends_with(".pdf") {
            return SyncItemOutcome {
                status: SyncStatus::Skipped,
                reason: Some("not_pdf".to_string()),
                item_key,
                filename: Some(filename),
                doc_id: None,
            };
        }

        let existing = match Document::find_by_filename(&filename, &self.db).await {
            Ok(existing) => existing,
            Err(err) => {
                error!(filename, error = %err, "document lookup failed during sync");
                return SyncItemOutcome {
                    status: SyncStatus::Failed,
                    reason: Some(err.to_string()),
                    item_key,
                    filename: Some(filename),
                    doc_id: None,
                };
            }
        };

        if let Some(existing) = &existing {
            if new_only || existing.processed {
                return SyncItemOutcome {
                    status: SyncStatus::Skipped,
                    reason: Some("already_exists".to_string()),
                    item_key,
                    filename: Some(filename),
                    doc_id: Some(existing.id.clone()),
                };
            }
        }

        let Some(key) = item_key.clone() else {
            return SyncItemOutcome {
                status: SyncStatus::Failed,
                reason: Some("missing item key".to_string()),
                item_key: None,
                filename: Some(filename),
                doc_id: None,
            };
        };

        let target = self.download_dir.join(&filename);
        if let Err(err) = self.client.download_attachment(&key, &target).await {
            error!(filename, error = %err, "attachment download failed");
            return SyncItemOutcome {
                status: SyncStatus::Failed,
                reason: Some(err.to_string()),
                item_key: Some(key),
                filename: Some(filename),
                doc_id: None,
            };
        }

        // A known-but-unprocessed row is already queued; the fresh download
        // just replaced its file.
        if let Some(existing) = existing {
            return SyncItemOutcome {
                status: SyncStatus::Queued,
                reason: None,
                item_key: Some(key),
                filename: Some(filename),
                doc_id: Some(existing.id),
            };
        }

        let document = Document::new(filename.clone(), target.to_string_lossy().into_owned());
        match self.db.store_item(document.clone()).await {
            Ok(_) => SyncItemOutcome {
                status: SyncStatus::Queued,
                reason: None,
                item_key: Some(key),
                filename: Some(filename),
                doc_id: Some(document.id),
            },
            Err(err) => {
                error!(filename, error = %err, "failed to store document row");
                SyncItemOutcome {
                    status: SyncStatus::Failed,
                    reason: Some(err.to_string()),
                    item_key: Some(key),
                    filename: Some(filename),
                    doc_id: None,
                }
            }
        }
    }

    /// Filenames already known to the document table, the dedup key used by
    /// the poller.
    pub async fn known_filenames(&self) -> Result<HashSet<String>, AppError> {
        let documents = Document::list_recent(&self.db).await?;
        Ok(documents
            .into_iter()
            .map(|document| document.file_name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method as MockMethod, MockServer};
    use uuid::Uuid;

    async fn service_with(server: &MockServer) -> (ZoteroSyncService, Arc<SurrealDbClient>, tempfile::TempDir) {
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

        (
            ZoteroSyncService::new(client, Arc::clone(&db), dir.path().to_path_buf()),
            db,
            dir,
        )
    }

    fn mock_items(server: &MockServer) {
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items");
            then.status(200).json_body(serde_json::json!([
                {
                    "key": "PDF1",
                    "data": {
                        "key": "PDF1",
                        "itemType": "attachment",
                        "filename": "neu.pdf"
                    }
                },
                {
                    "key": "DOCX",
                    "data": {
                        "key": "DOCX",
                        "itemType": "attachment",
                        "filename": "slides.docx"
                    }
                },
                {
                    "key": "NOTE",
                    "data": { "key": "NOTE", "itemType": "note" }
                }
            ]));
        });
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items/PDF1/file");
            then.status(200).body("%PDF-1.4 fake");
        });
    }

    #[tokio::test]
    async fn sync_new_only_queues_pdfs_and_reports_skips() {
        let server = MockServer::start_async().await;
        mock_items(&server);

        let (service, db, _dir) = service_with(&server).await;

        let report = service.sync_new_only().await.expect("sync");

        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);

        let reasons: Vec<Option<&str>> = report
            .details
            .iter()
            .map(|outcome| outcome.reason.as_deref())
            .collect();
        assert!(reasons.contains(&Some("not_attachment")));
        assert!(reasons.contains(&Some("not_pdf")));

        let document = Document::find_by_filename("neu.pdf", &db)
            .await
            .expect("lookup")
            .expect("queued document");
        assert!(!document.processed);
        assert_eq!(document.num_chunks, None);
        assert!(std::path::Path::new(&document.file_path).exists());
    }

    #[tokio::test]
    async fn second_sync_reports_zero_new_items() {
        let server = MockServer::start_async().await;
        mock_items(&server);

        let (service, _db, _dir) = service_with(&server).await;

        let first = service.sync_new_only().await.expect("first sync");
        assert_eq!(first.queued, 1);

        let second = service.sync_new_only().await.expect("second sync");
        assert_eq!(second.queued, 0);
        assert!(second
            .details
            .iter()
            .any(|outcome| outcome.reason.as_deref() == Some("already_exists")));
    }

    #[tokio::test]
    async fn disabled_integration_returns_an_empty_report() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("db"),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let client = Arc::new(
            ZoteroClient::with_base_url(
                "http://127.0.0.1:1".to_string(),
                String::new(),
                String::new(),
                "user".to_string(),
            )
            .expect("client"),
        );
        let service = ZoteroSyncService::new(client, db, dir.path().to_path_buf());

        let report = service.sync_all().await.expect("sync");
        assert_eq!(report.queued + report.skipped + report.failed, 0);
    }

    #[tokio::test]
    async fn failed_download_is_reported_per_item() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items");
            then.status(200).json_body(serde_json::json!([
                {
                    "key": "BAD",
                    "data": {
                        "key": "BAD",
                        "itemType": "attachment",
                        "filename": "broken.pdf"
                    }
                }
            ]));
        });
        server.mock(|when, then| {
            when.method(MockMethod::GET).path("/users/7/items/BAD/file");
            then.status(500);
        });

        let (service, db, _dir) = service_with(&server).await;

        let report = service.sync_all().await.expect("sync");
        assert_eq!(report.failed, 1);
        assert_eq!(report.queued, 0);

        // No half-created document row.
        let missing = Document::find_by_filename("broken.pdf", &db)
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }
}
