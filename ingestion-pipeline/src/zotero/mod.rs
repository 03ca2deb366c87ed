//! Zotero reference-library integration: a read-only API client, the sync
//! service that enqueues new PDFs for ingestion, and the periodic poller.

pub mod client;
pub mod poller;
pub mod sync;

pub use client::{ZoteroClient, ZoteroItem};
pub use poller::run_poller_loop;
pub use sync::{SyncReport, ZoteroSyncService};
