#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod extraction;
pub mod metadata;
pub mod pipeline;
pub mod startup;
pub mod worker;
pub mod zotero;

pub use pipeline::IngestPipeline;
pub use worker::{run_worker_loop, WorkerHandle};
