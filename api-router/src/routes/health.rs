use axum::{extract::State, Json};
use common::storage::types::document::Document;
use serde_json::{json, Value};

use crate::{api_state::ApiState, error::ApiError};

pub async fn health(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let vector_store = match state.vector_store.list_collections().await {
        Ok(_) => "reachable",
        Err(_) => "unreachable",
    };

    let documents = Document::list_recent(&state.db)
        .await
        .map(|documents| documents.len())
        .unwrap_or(0);

    Ok(Json(json!({
        "status": "ok",
        "vector_store": vector_store,
        "documents": documents,
    })))
}
