use serde::{Deserialize, Serialize};

/// One chunk as produced by the chunker, ready to be embedded and upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub parent_id: i64,
    pub section: String,
    pub position: String,
    pub is_metadata: bool,
}

/// Vector point payload, as written on upsert and read back on query/scroll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub doc_id: String,
    pub chunk_id: i64,
    pub text: String,
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub document_name: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub position: String,
    pub chunk_index: Option<i64>,
    pub total_chunks: Option<i64>,
}

/// A retrieved chunk: payload plus the fused retrieval score, later enriched
/// by the reranker and the metadata-injection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHit {
    pub text: String,
    pub doc_id: String,
    pub chunk_id: i64,
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub document_name: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub position: String,
    pub chunk_index: Option<i64>,
    pub total_chunks: Option<i64>,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(default)]
    pub is_metadata_injection: bool,
    #[serde(default)]
    pub metadata_priority: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_used: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_reason: Option<String>,
}

impl ChunkHit {
    pub fn from_payload(payload: PointPayload, score: f32) -> Self {
        Self {
            text: payload.text,
            doc_id: payload.doc_id,
            chunk_id: payload.chunk_id,
            parent_id: payload.parent_id,
            document_name: payload.document_name,
            section: payload.section,
            position: payload.position,
            chunk_index: payload.chunk_index,
            total_chunks: payload.total_chunks,
            score,
            rerank_score: None,
            is_metadata_injection: false,
            metadata_priority: false,
            threshold_used: None,
            threshold_reason: None,
        }
    }

    /// Dedup key used across retrieval rounds.
    pub fn chunk_key(&self) -> (String, i64) {
        (self.doc_id.clone(), self.chunk_id)
    }
}
