use std::{path::Path as FsPath, time::Duration};

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use chrono::{DateTime, Utc};
use common::{error::AppError, storage::types::document::Document};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

/// Seconds the processing stream keeps polling before giving up.
const PROCESSING_STREAM_TICKS: usize = 120;

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub processed: bool,
    pub num_chunks: Option<i64>,
    pub collection_name: String,
    pub query_enabled: bool,
    pub parent_store_path: Option<String>,
    pub is_actively_processing: bool,
}

impl DocumentResponse {
    fn from_document(document: Document, is_actively_processing: bool) -> Self {
        Self {
            collection_name: document.collection_name(),
            id: document.id,
            filename: document.file_name,
            file_path: document.file_path,
            uploaded_at: document.created_at,
            processed: document.processed,
            num_chunks: document.num_chunks,
            query_enabled: document.query_enabled,
            parent_store_path: document.parent_store_path,
            is_actively_processing,
        }
    }
}

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "50MiB")]
    pub file: FieldData<NamedTempFile>,
}

pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let filename = input
        .file
        .metadata
        .file_name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Uploaded file needs a filename".to_string()))?;

    info!(filename, "document upload received");

    let upload_dir = state.config.upload_dir();
    std::fs::create_dir_all(&upload_dir).map_err(AppError::from)?;
    let target = upload_dir.join(&filename);

    // `persist` fails across filesystems; fall back to a plain copy.
    if let Err(err) = input.file.contents.persist(&target) {
        std::fs::copy(err.file.path(), &target).map_err(AppError::from)?;
    }

    let document = Document::new(filename, target.to_string_lossy().into_owned());
    state
        .db
        .store_item(document.clone())
        .await
        .map_err(AppError::from)?;

    info!(doc_id = %document.id, "document queued for processing");
    state.worker.trigger();

    Ok(Json(DocumentResponse::from_document(document, false)))
}

pub async fn list_documents(
    State(state): State<ApiState>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = Document::list_recent(&state.db).await?;

    let responses = documents
        .into_iter()
        .map(|document| {
            let active = state.status.is_processing(&document.id);
            DocumentResponse::from_document(document, active)
        })
        .collect();

    Ok(Json(responses))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = fetch_document(&state, &doc_id).await?;
    let active = state.status.is_processing(&document.id);
    Ok(Json(DocumentResponse::from_document(document, active)))
}

pub async fn reprocess_document(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = fetch_document(&state, &doc_id).await?;
    if document.file_path.is_empty() || !FsPath::new(&document.file_path).exists() {
        return Err(ApiError::BadRequest("File not found".to_string()));
    }

    Document::requeue(&doc_id, &state.db).await?;
    state.worker.trigger();

    let requeued = fetch_document(&state, &doc_id).await?;
    info!(doc_id = %doc_id, "document requeued for processing");
    Ok(Json(DocumentResponse::from_document(requeued, false)))
}

#[derive(Debug, Deserialize)]
pub struct PreferenceUpdate {
    pub query_enabled: bool,
}

pub async fn update_preferences(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
    Json(input): Json<PreferenceUpdate>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let updated = Document::set_query_enabled(&doc_id, input.query_enabled, &state.db)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => ApiError::NotFound("Document not found".to_string()),
            other => other.into(),
        })?;

    let active = state.status.is_processing(&updated.id);
    Ok(Json(DocumentResponse::from_document(updated, active)))
}

/// Delete the row first (fatal on failure), then clean up collection,
/// side-store and source file best-effort.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let document = fetch_document(&state, &doc_id).await?;

    state
        .db
        .delete_item::<Document>(&doc_id)
        .await
        .map_err(AppError::from)?;

    let collection_name = document.collection_name();
    if let Err(err) = state.vector_store.delete_document(&collection_name).await {
        warn!(doc_id = %doc_id, error = %err, "collection deletion failed");
    }

    if let Some(parent_store_path) = &document.parent_store_path {
        if let Err(err) = std::fs::remove_file(parent_store_path) {
            warn!(doc_id = %doc_id, error = %err, "side-store cleanup failed");
        }
    }

    if !document.file_path.is_empty() {
        if let Err(err) = std::fs::remove_file(&document.file_path) {
            warn!(doc_id = %doc_id, error = %err, "source file cleanup failed");
        }
    }

    state.status.clear(&doc_id);
    info!(doc_id = %doc_id, "document deleted");
    Ok(Json(json!({ "status": "deleted" })))
}

/// SSE progress feed for one document: `waiting` while queued, `progress` on
/// every status change, terminal `complete` or `timeout`.
pub async fn processing_stream(
    State(state): State<ApiState>,
    Path(doc_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    fetch_document(&state, &doc_id).await?;

    let stream = processing_event_stream(state, doc_id);
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    let mut response = sse.into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        axum::http::HeaderName::from_static("x-accel-buffering"),
        axum::http::HeaderValue::from_static("no"),
    );

    Ok(response)
}

fn processing_event_stream(
    state: ApiState,
    doc_id: String,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    async_stream::stream! {
        let mut last_message: Option<String> = None;

        for _ in 0..PROCESSING_STREAM_TICKS {
            let document: Option<Document> = match state.db.get_item(&doc_id).await {
                Ok(document) => document,
                Err(err) => {
                    yield Event::default()
                        .event("error")
                        .json_data(json!({ "message": err.to_string() }));
                    return;
                }
            };

            if let Some(document) = document {
                if document.processed {
                    yield Event::default().event("complete").json_data(json!({
                        "doc_id": doc_id,
                        "stage": "complete",
                        "progress": 1.0,
                        "message": format!(
                            "Complete - {} chunks",
                            document.num_chunks.unwrap_or_default()
                        ),
                        "processed": true,
                        "num_chunks": document.num_chunks,
                        "timestamp": Utc::now(),
                    }));
                    return;
                }
            }

            match state.status.status_for(&doc_id) {
                Some(status) => {
                    let fingerprint = format!("{}:{}", status.stage, status.message);
                    if last_message.as_deref() != Some(&fingerprint) {
                        last_message = Some(fingerprint);
                        yield Event::default().event("progress").json_data(&status);
                    }
                }
                None => {
                    yield Event::default().event("waiting").json_data(json!({
                        "doc_id": doc_id,
                        "stage": "queued",
                        "progress": 0.0,
                        "message": "Queued",
                        "timestamp": Utc::now(),
                    }));
                }
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        yield Event::default()
            .event("timeout")
            .json_data(json!({ "doc_id": doc_id, "message": "Timeout" }));
    }
}

async fn fetch_document(state: &ApiState, doc_id: &str) -> Result<Document, ApiError> {
    let document: Option<Document> = state
        .db
        .get_item(doc_id)
        .await
        .map_err(AppError::from)?;

    document.ok_or_else(|| ApiError::NotFound("Document not found".to_string()))
}
