//! The ingest pipeline: extract, metadata, chunk, embed/store, finalize.
//! Progress lands in the process-wide status registry after every stage; a
//! failure marks the document terminally failed so the worker never loops on
//! it.

use std::{path::Path, sync::Arc};

use common::{
    error::AppError,
    observability::StatusRegistry,
    storage::{db::SurrealDbClient, parent_store, types::document::Document},
    utils::config::AppConfig,
    vector::VectorStore,
};
use tracing::{error, info, instrument, warn};

use crate::{
    chunker::{chunk_document, ChunkingParams},
    extraction::{self, PdfMetadata},
    metadata::{compose_metadata_chunk, MetadataExtractor},
};

const FIRST_PAGES_FOR_METADATA: usize = 2;
const FIRST_PAGES_MAX_CHARS: usize = 8_000;
const EMBEDDING_PROGRESS_BATCH: usize = 10;

pub struct IngestPipeline {
    db: Arc<SurrealDbClient>,
    vector_store: Arc<VectorStore>,
    metadata_extractor: MetadataExtractor,
    status: Arc<StatusRegistry>,
    config: AppConfig,
}

impl IngestPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vector_store: Arc<VectorStore>,
        metadata_extractor: MetadataExtractor,
        status: Arc<StatusRegistry>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            vector_store,
            metadata_extractor,
            status,
            config,
        }
    }

    /// Run all stages for one document. On failure the document is re-fetched
    /// and marked with the `-1` sentinel before the error propagates.
    #[instrument(skip_all, fields(doc_id = %document.id, file_name = %document.file_name))]
    pub async fn process_document(
        &self,
        document: &Document,
        file_path: &Path,
    ) -> Result<Document, AppError> {
        let doc_id = document.id.clone();

        match self.run_stages(document, file_path).await {
            Ok(processed) => Ok(processed),
            Err(err) => {
                self.status
                    .report(&doc_id, "error", 0.0, format!("Processing failed: {err}"));

                // The in-memory row may be stale; the patch goes by id.
                if let Err(mark_err) = Document::mark_failed(&doc_id, &self.db).await {
                    error!(
                        doc_id,
                        error = %mark_err,
                        "failed to record terminal ingestion failure"
                    );
                }

                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        document: &Document,
        file_path: &Path,
    ) -> Result<Document, AppError> {
        let doc_id = document.id.clone();
        let collection_name = document.collection_name();

        self.status
            .report(&doc_id, "starting", 0.05, "Starting document processing...");

        // Stage 1: text extraction.
        self.status
            .report(&doc_id, "extraction", 0.1, "Extracting text from document...");
        let text = extraction::extract_text(file_path)?;
        self.status.report(
            &doc_id,
            "extraction",
            0.2,
            format!("Text extracted ({} chars)", text.chars().count()),
        );

        // Stage 2: metadata.
        self.status
            .report(&doc_id, "metadata", 0.25, "Extracting metadata...");
        let metadata_chunk = self.extract_metadata(file_path, &document.file_name).await;
        self.status.report(
            &doc_id,
            "metadata",
            0.3,
            if metadata_chunk.is_some() {
                "Metadata extracted"
            } else {
                "No metadata found"
            },
        );

        // Stage 3: chunking and the parent side-store.
        self.status
            .report(&doc_id, "chunking", 0.35, "Splitting document into chunks...");
        let params = ChunkingParams::from(&self.config);
        let (parents, children) = chunk_document(&text, metadata_chunk.as_deref(), &params);

        if children.is_empty() {
            return Err(AppError::Processing(format!(
                "document {doc_id} produced no chunks"
            )));
        }

        let store_path = self
            .config
            .parent_store_dir()
            .join(format!("doc_{doc_id}.json"));
        parent_store::store_parents(&store_path, &parents)?;
        self.status.report(
            &doc_id,
            "chunking",
            0.45,
            format!("Created {} chunks", children.len()),
        );

        // Stage 4: embedding and vector storage.
        self.status
            .report(&doc_id, "embedding", 0.5, "Preparing vector store...");
        self.vector_store.reset_collection(&collection_name).await?;

        let total = children.len();
        let mut stored = 0usize;
        for batch in children.chunks(EMBEDDING_PROGRESS_BATCH) {
            self.vector_store
                .add_documents_range(
                    &doc_id,
                    batch,
                    &collection_name,
                    &document.file_name,
                    stored,
                    total,
                )
                .await?;
            stored += batch.len();

            let progress = 0.55 + 0.30 * (stored as f32 / total as f32);
            self.status.report(
                &doc_id,
                "embedding",
                progress,
                format!("Embedding chunk {stored}/{total}"),
            );
        }
        self.status
            .report(&doc_id, "storing", 0.9, "Storing vectors complete");

        // Stage 5: finalize the record.
        self.status
            .report(&doc_id, "finalizing", 0.95, "Updating database...");
        let store_path_str = store_path.to_string_lossy().into_owned();
        Document::mark_processed(&doc_id, total as i64, &store_path_str, &self.db).await?;

        let processed: Document = self
            .db
            .get_item(&doc_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {doc_id} vanished mid-ingest")))?;

        self.status.report(
            &doc_id,
            "complete",
            1.0,
            format!("Processing complete - {total} chunks created"),
        );

        info!(doc_id, chunks = total, "document ingested");
        Ok(processed)
    }

    /// Compose the metadata chunk; any failure here only costs the chunk,
    /// never the document.
    async fn extract_metadata(&self, file_path: &Path, file_name: &str) -> Option<String> {
        let first_pages = match extraction::extract_first_pages_text(
            file_path,
            FIRST_PAGES_FOR_METADATA,
            FIRST_PAGES_MAX_CHARS,
        ) {
            Ok(text) => text,
            Err(err) => {
                warn!(file_name, error = %err, "metadata extraction skipped");
                return None;
            }
        };

        let pdf_metadata: Option<PdfMetadata> = if file_name.to_lowercase().ends_with(".pdf") {
            extraction::extract_pdf_metadata(file_path).ok()
        } else {
            None
        };

        let metadata = self
            .metadata_extractor
            .extract(&first_pages, file_name, pdf_metadata.as_ref())
            .await;

        Some(compose_metadata_chunk(&metadata, file_name))
    }
}
