//! Process-wide transient ingestion state: per-document progress entries and
//! the single currently-processing marker. The pipeline/worker are the only
//! writers; status-stream readers take snapshot copies.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingStatus {
    pub doc_id: String,
    pub stage: String,
    pub progress: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct StatusRegistry {
    statuses: Mutex<HashMap<String, ProcessingStatus>>,
    currently_processing: Mutex<Option<String>>,
}

impl StatusRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn report(&self, doc_id: &str, stage: &str, progress: f32, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(
            doc_id,
            stage,
            progress = format!("{:.0}%", progress * 100.0),
            %message,
            "ingestion progress"
        );

        let status = ProcessingStatus {
            doc_id: doc_id.to_string(),
            stage: stage.to_string(),
            progress,
            message,
            timestamp: Utc::now(),
        };

        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(doc_id.to_string(), status);
        }
    }

    /// Snapshot of the latest status for one document.
    pub fn status_for(&self, doc_id: &str) -> Option<ProcessingStatus> {
        self.statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(doc_id).cloned())
    }

    pub fn clear(&self, doc_id: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.remove(doc_id);
        }
    }

    pub fn set_currently_processing(&self, doc_id: &str) {
        if let Ok(mut current) = self.currently_processing.lock() {
            *current = Some(doc_id.to_string());
        }
    }

    pub fn clear_currently_processing(&self) {
        if let Ok(mut current) = self.currently_processing.lock() {
            *current = None;
        }
    }

    pub fn currently_processing(&self) -> Option<String> {
        self.currently_processing
            .lock()
            .ok()
            .and_then(|current| current.clone())
    }

    pub fn is_processing(&self, doc_id: &str) -> bool {
        self.currently_processing().as_deref() == Some(doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_readable_as_snapshots() {
        let registry = StatusRegistry::new();

        registry.report("doc-1", "extraction", 0.1, "Extracting text");
        registry.report("doc-1", "chunking", 0.4, "Splitting document");

        let status = registry.status_for("doc-1").expect("status present");
        assert_eq!(status.stage, "chunking");
        assert!((status.progress - 0.4).abs() < f32::EPSILON);

        assert!(registry.status_for("doc-2").is_none());

        registry.clear("doc-1");
        assert!(registry.status_for("doc-1").is_none());
    }

    #[test]
    fn currently_processing_marker_holds_at_most_one_doc() {
        let registry = StatusRegistry::new();
        assert_eq!(registry.currently_processing(), None);

        registry.set_currently_processing("doc-1");
        assert!(registry.is_processing("doc-1"));
        assert!(!registry.is_processing("doc-2"));

        registry.set_currently_processing("doc-2");
        assert_eq!(registry.currently_processing(), Some("doc-2".to_string()));

        registry.clear_currently_processing();
        assert_eq!(registry.currently_processing(), None);
    }
}
