//! Per-document hybrid vector collections on Qdrant, spoken over its REST
//! API: dense + sparse named vectors, RRF fusion queries and payload-filter
//! scrolls.

mod store;
mod types;

pub use store::VectorStore;
pub use types::{ChunkHit, DocumentChunk, PointPayload};
