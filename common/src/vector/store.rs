use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::types::document::Document,
    utils::{config::AppConfig, embedding::EmbeddingService, sparse::embed_sparse},
};

use super::types::{ChunkHit, DocumentChunk, PointPayload};

/// Lightweight HTTP client for the Qdrant REST API, managing one hybrid
/// collection per document.
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
    collection_prefix: String,
    embedder: Arc<EmbeddingService>,
}

impl VectorStore {
    pub fn new(config: &AppConfig, embedder: Arc<EmbeddingService>) -> Result<Self, AppError> {
        Self::with_base_url(
            config.qdrant_url(),
            config.qdrant_collection_prefix.clone(),
            embedder,
        )
    }

    pub fn with_base_url(
        base_url: String,
        collection_prefix: String,
        embedder: Arc<EmbeddingService>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().build().map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_prefix,
            embedder,
        })
    }

    pub fn collection_name_for_document(&self, document_id: &str) -> String {
        format!("{}{}", self.collection_prefix, document_id)
    }

    /// `{doc_id -> collection_name}` for every given document.
    pub fn build_collection_map(&self, documents: &[Document]) -> HashMap<String, String> {
        documents
            .iter()
            .map(|document| {
                (
                    document.id.clone(),
                    self.collection_name_for_document(&document.id),
                )
            })
            .collect()
    }

    pub async fn collection_exists(&self, collection_name: &str) -> Result<bool, AppError> {
        if collection_name.is_empty() {
            return Ok(false);
        }

        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::VectorStore(format!(
                    "collection existence check failed with {status}: {body}"
                )))
            }
        }
    }

    /// Create the collection when missing, or recreate it when it is not
    /// hybrid-ready or its dense dimension no longer matches the encoder.
    pub async fn ensure_collection(&self, collection_name: &str) -> Result<(), AppError> {
        if collection_name.is_empty() {
            return Ok(());
        }

        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!(collection = collection_name, "Creating collection");
            return self.create_hybrid_collection(collection_name).await;
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorStore(format!(
                "failed to inspect collection {collection_name}: {status}: {body}"
            )));
        }

        let info: Value = response.json().await?;
        let params = &info["result"]["config"]["params"];

        let dense = &params["vectors"]["dense"];
        let has_dense = dense.is_object();
        let has_sparse = params["sparse_vectors"]["sparse"].is_object();

        if !has_dense || !has_sparse {
            info!(
                collection = collection_name,
                "Recreating collection for hybrid support"
            );
            return self.create_hybrid_collection(collection_name).await;
        }

        let current_size = dense["size"].as_u64();
        if let Some(size) = current_size {
            if size as usize != self.embedder.dimension() {
                info!(
                    collection = collection_name,
                    current = size,
                    expected = self.embedder.dimension(),
                    "Recreating collection due to dimension change"
                );
                return self.create_hybrid_collection(collection_name).await;
            }
        }

        Ok(())
    }

    /// Delete-then-create, used when re-ingesting a document from scratch.
    pub async fn reset_collection(&self, collection_name: &str) -> Result<(), AppError> {
        if collection_name.is_empty() {
            return Ok(());
        }

        let _ = self.delete_collection(collection_name).await;
        self.create_hybrid_collection(collection_name).await
    }

    async fn create_hybrid_collection(&self, collection_name: &str) -> Result<(), AppError> {
        if self.collection_exists(collection_name).await.unwrap_or(false) {
            if let Err(err) = self.delete_collection(collection_name).await {
                warn!(
                    collection = collection_name,
                    error = %err,
                    "Failed to delete existing collection before recreation"
                );
            }
        }

        let body = json!({
            "vectors": {
                "dense": {
                    "size": self.embedder.dimension(),
                    "distance": "Cosine",
                    "quantization_config": {
                        "scalar": {
                            "type": "int8",
                            "quantile": 0.99,
                            "always_ram": true
                        }
                    }
                }
            },
            "sparse_vectors": {
                "sparse": {
                    "index": { "on_disk": false }
                }
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, "create collection").await?;

        self.create_payload_indexes(collection_name).await;
        Ok(())
    }

    /// Indexes for the fields retrieval filters on. Failures are logged, not
    /// fatal: queries still work, just slower.
    async fn create_payload_indexes(&self, collection_name: &str) {
        let fields: [(&str, &str); 3] = [
            ("doc_id", "keyword"),
            ("section", "keyword"),
            ("parent_id", "integer"),
        ];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let result = self
                .request(Method::PUT, &format!("collections/{collection_name}/index"))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(collection = collection_name, field, "Payload index ensured");
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(
                        collection = collection_name,
                        field,
                        %status,
                        "Failed to create payload index"
                    );
                }
                Err(err) => {
                    warn!(
                        collection = collection_name,
                        field,
                        error = %err,
                        "Failed to create payload index"
                    );
                }
            }
        }
    }

    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), AppError> {
        if collection_name.is_empty() {
            return Ok(());
        }

        let response = self
            .request(Method::DELETE, &format!("collections/{collection_name}"))
            .send()
            .await?;

        self.ensure_success(response, "delete collection").await
    }

    /// Alias kept for callers thinking in documents rather than collections.
    pub async fn delete_document(&self, collection_name: &str) -> Result<(), AppError> {
        self.delete_collection(collection_name).await
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, AppError> {
        let response = self.request(Method::GET, "collections").send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorStore(format!(
                "failed to list collections: {status}: {body}"
            )));
        }

        let parsed: Value = response.json().await?;
        let names = parsed["result"]["collections"]
            .as_array()
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|collection| collection["name"].as_str())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(names)
    }

    /// Delete every prefix-matching collection that is not in the valid set.
    /// Collections outside the prefix are left alone.
    pub async fn cleanup_orphaned_collections(
        &self,
        valid_collections: &HashSet<String>,
    ) -> Result<(), AppError> {
        let collections = match self.list_collections().await {
            Ok(collections) => collections,
            Err(err) => {
                warn!(error = %err, "Unable to list collections for orphan cleanup");
                return Ok(());
            }
        };

        for name in collections {
            if !name.starts_with(&self.collection_prefix) || valid_collections.contains(&name) {
                continue;
            }

            info!(collection = %name, "Deleting orphaned collection");
            if let Err(err) = self.delete_collection(&name).await {
                warn!(collection = %name, error = %err, "Failed to delete orphaned collection");
            }
        }

        Ok(())
    }

    /// Embed and upsert all chunks of one document. A schema drift surfacing
    /// as a vector/size error triggers one recreate-and-retry.
    pub async fn add_documents(
        &self,
        doc_id: &str,
        chunks: &[DocumentChunk],
        collection_name: &str,
        document_name: &str,
    ) -> Result<(), AppError> {
        self.add_documents_range(doc_id, chunks, collection_name, document_name, 0, chunks.len())
            .await
    }

    /// Upsert one slice of a document's chunks. `start_index` and
    /// `total_chunks` keep `chunk_index`/`chunk_id` aligned with the chunk's
    /// position in the whole document, so callers can batch for progress
    /// reporting without changing the stored payloads.
    pub async fn add_documents_range(
        &self,
        doc_id: &str,
        chunks: &[DocumentChunk],
        collection_name: &str,
        document_name: &str,
        start_index: usize,
        total_chunks: usize,
    ) -> Result<(), AppError> {
        if collection_name.is_empty() {
            return Err(AppError::VectorStore(format!(
                "cannot add documents: empty collection name for doc {doc_id}"
            )));
        }

        info!(
            collection = collection_name,
            doc_id,
            chunks = chunks.len(),
            start_index,
            "Adding chunks to collection"
        );

        self.ensure_collection(collection_name).await?;

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let dense_embeddings = self.embedder.embed_batch(&texts).await?;

        let points: Vec<Value> = chunks
            .iter()
            .zip(dense_embeddings)
            .enumerate()
            .map(|(offset, (chunk, dense))| {
                let index = start_index + offset;
                let sparse = embed_sparse(&chunk.text);
                let payload = PointPayload {
                    doc_id: doc_id.to_string(),
                    chunk_id: index as i64,
                    text: chunk.text.clone(),
                    parent_id: Some(chunk.parent_id),
                    document_name: document_name.to_string(),
                    section: chunk.section.clone(),
                    position: chunk.position.clone(),
                    chunk_index: Some(index as i64),
                    total_chunks: Some(total_chunks as i64),
                };

                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": {
                        "dense": dense,
                        "sparse": {
                            "indices": sparse.indices,
                            "values": sparse.values,
                        }
                    },
                    "payload": payload,
                })
            })
            .collect();

        match self.upsert_points(collection_name, &points).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let message = err.to_string().to_lowercase();
                if message.contains("vector") || message.contains("size") {
                    warn!(
                        collection = collection_name,
                        "Schema mismatch on upsert, recreating collection once"
                    );
                    self.create_hybrid_collection(collection_name).await?;
                    self.upsert_points(collection_name, &points).await
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn upsert_points(
        &self,
        collection_name: &str,
        points: &[Value],
    ) -> Result<(), AppError> {
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )
            .query(&[("wait", "true")])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, "upsert points").await
    }

    /// Hybrid search across the given collections: dense and sparse prefetch
    /// fused with RRF per collection, then a global merge by score.
    pub async fn search(
        &self,
        query: &str,
        doc_collection_map: &HashMap<String, String>,
        top_k: usize,
    ) -> Result<Vec<ChunkHit>, AppError> {
        if doc_collection_map.is_empty() {
            warn!("search called with empty document collection map");
            return Ok(Vec::new());
        }

        let dense = self.embedder.embed_text(query).await?;
        let sparse = embed_sparse(query);
        let per_collection_limit = top_k.max(5);

        let mut combined: Vec<ChunkHit> = Vec::new();

        for (doc_id, collection_name) in doc_collection_map {
            if collection_name.is_empty() {
                warn!(doc_id, "empty collection name in search map");
                continue;
            }

            if !self.collection_exists(collection_name).await.unwrap_or(false) {
                warn!(
                    doc_id,
                    collection = collection_name,
                    "collection missing during search, skipping"
                );
                continue;
            }

            let body = json!({
                "prefetch": [
                    {
                        "query": dense,
                        "using": "dense",
                        "limit": per_collection_limit * 2,
                    },
                    {
                        "query": {
                            "indices": sparse.indices,
                            "values": sparse.values,
                        },
                        "using": "sparse",
                        "limit": per_collection_limit * 2,
                    }
                ],
                "query": { "fusion": "rrf" },
                "limit": per_collection_limit,
                "with_payload": true,
                "params": {
                    "quantization": {
                        "ignore": false,
                        "rescore": true,
                        "oversampling": 2.0,
                    }
                }
            });

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{collection_name}/points/query"),
                )
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    let status = response.status();
                    warn!(
                        collection = collection_name,
                        %status,
                        "query failed for collection, skipping"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        collection = collection_name,
                        error = %err,
                        "query failed for collection, skipping"
                    );
                    continue;
                }
            };

            let parsed: Value = response.json().await?;
            let points = parsed["result"]["points"].as_array().cloned().unwrap_or_default();

            for point in points {
                let score = point["score"].as_f64().unwrap_or_default() as f32;
                if let Ok(payload) =
                    serde_json::from_value::<PointPayload>(point["payload"].clone())
                {
                    combined.push(ChunkHit::from_payload(payload, score));
                }
            }
        }

        combined.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        combined.truncate(top_k);

        Ok(combined)
    }

    /// Fetch the synthesized metadata chunks (section "Document Metadata")
    /// of each collection, tagged as injections with a zero score.
    pub async fn get_metadata_chunks_for_docs(
        &self,
        doc_collection_map: &HashMap<String, String>,
    ) -> Result<Vec<ChunkHit>, AppError> {
        if doc_collection_map.is_empty() {
            return Ok(Vec::new());
        }

        let mut metadata_chunks = Vec::new();

        for (doc_id, collection_name) in doc_collection_map {
            if !self.collection_exists(collection_name).await.unwrap_or(false) {
                continue;
            }

            let body = json!({
                "filter": {
                    "must": [
                        {
                            "key": "section",
                            "match": { "value": "Document Metadata" }
                        }
                    ]
                },
                "limit": 2,
                "with_payload": true,
            });

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{collection_name}/points/scroll"),
                )
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    warn!(
                        doc_id,
                        status = %response.status(),
                        "failed to scroll metadata chunks"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(doc_id, error = %err, "failed to scroll metadata chunks");
                    continue;
                }
            };

            let parsed: Value = response.json().await?;
            let points = parsed["result"]["points"].as_array().cloned().unwrap_or_default();

            for point in points {
                if let Ok(payload) =
                    serde_json::from_value::<PointPayload>(point["payload"].clone())
                {
                    let mut hit = ChunkHit::from_payload(payload, 0.0);
                    hit.is_metadata_injection = true;
                    metadata_chunks.push(hit);
                }
            }
        }

        Ok(metadata_chunks)
    }

    /// Whether the collection holds at least one point.
    pub async fn document_exists(&self, collection_name: &str) -> bool {
        if !self.collection_exists(collection_name).await.unwrap_or(false) {
            return false;
        }

        let body = json!({ "limit": 1, "with_payload": false });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/scroll"),
            )
            .json(&body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|parsed| {
                    parsed["result"]["points"]
                        .as_array()
                        .map(|points| !points.is_empty())
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.client.request(method, url)
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        action: &str,
    ) -> Result<(), AppError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AppError::VectorStore(format!(
                "{action} failed with {status}: {body}"
            )))
        }
    }
}
