use axum::{extract::State, Json};
use serde_json::{json, Value};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

pub async fn sync_all(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let report = state.zotero_sync.sync_all().await?;

    if report.queued > 0 {
        state.worker.trigger();
    }

    info!(queued = report.queued, skipped = report.skipped, "manual Zotero sync finished");
    Ok(Json(json!({ "status": "completed", "details": report })))
}

pub async fn sync_new(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let report = state.zotero_sync.sync_new_only().await?;

    if report.queued > 0 {
        state.worker.trigger();
    }

    info!(queued = report.queued, skipped = report.skipped, "incremental Zotero sync finished");
    Ok(Json(json!({ "status": "completed", "details": report })))
}

pub async fn status(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    if !state.zotero_client.is_enabled() {
        return Ok(Json(json!({ "enabled": false })));
    }

    let items = state.zotero_client.list_items().await?;
    let pdf_attachments = items.iter().filter(|item| item.is_pdf_attachment()).count();

    Ok(Json(json!({
        "enabled": true,
        "total_items": items.len(),
        "pdf_attachments": pdf_attachments,
    })))
}
