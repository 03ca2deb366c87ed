//! Streaming query endpoint: retrieval runs as a sibling task feeding a
//! thinking channel, the SSE writer drains it, then answer tokens stream
//! straight through to the client.

use std::time::Duration;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use common::{
    error::AppError,
    storage::types::{
        chat::Chat,
        document::Document,
        message::{Message, MessageRole},
    },
};
use futures::StreamExt;
use retrieval_pipeline::{engine::NO_CONTEXT_ANSWER, ThinkingStep};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{api_state::ApiState, error::ApiError};

/// Ceiling on joining the retrieval task once its channel has drained.
const RETRIEVAL_JOIN_TIMEOUT: Duration = Duration::from_secs(60);
const THINKING_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub chat_id: String,
    pub query: String,
}

pub async fn query_stream(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    let preview: String = request.query.chars().take(100).collect();
    info!(chat_id = %request.chat_id, query = %preview, "query received");

    // 1. Chat and history.
    let chat: Option<Chat> = state
        .db
        .get_item(&request.chat_id)
        .await
        .map_err(AppError::from)?;
    if chat.is_none() {
        return Err(ApiError::NotFound("Chat not found".to_string()));
    }

    let chat_history = Message::list_for_chat(&request.chat_id, &state.db).await?;

    // 2. Active documents.
    let documents = Document::list_recent(&state.db).await?;
    let active_documents: Vec<Document> = documents
        .into_iter()
        .filter(|document| document.processed && document.query_enabled && !document.is_failed())
        .collect();
    let doc_collection_map = state.vector_store.build_collection_map(&active_documents);

    if doc_collection_map.is_empty() {
        return Err(ApiError::BadRequest(
            "No active documents selected for querying.".to_string(),
        ));
    }

    // 3. Persist the user turn.
    let user_message = Message::new(
        request.chat_id.clone(),
        MessageRole::User,
        request.query.clone(),
    );
    state
        .db
        .store_item(user_message)
        .await
        .map_err(AppError::from)?;
    Chat::touch(&request.chat_id, &state.db).await?;

    // 4. Retrieval as a sibling task with a typed thinking channel.
    let (thinking_tx, thinking_rx) = mpsc::channel::<ThinkingStep>(THINKING_CHANNEL_CAPACITY);
    let engine = state.rag_engine.clone();
    let retrieval_query = request.query.clone();
    let retrieval_map = doc_collection_map.clone();
    let retrieval_task = tokio::spawn(async move {
        engine
            .multi_query_retrieve_and_rerank(&retrieval_query, &retrieval_map, Some(thinking_tx))
            .await
    });

    // 5. The SSE stream.
    let stream = answer_event_stream(state, request, chat_history, thinking_rx, retrieval_task);
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

fn answer_event_stream(
    state: ApiState,
    request: QueryRequest,
    chat_history: Vec<Message>,
    mut thinking_rx: mpsc::Receiver<ThinkingStep>,
    retrieval_task: tokio::task::JoinHandle<
        Result<retrieval_pipeline::RetrievalOutcome, AppError>,
    >,
) -> impl futures::Stream<Item = Result<Event, axum::Error>> {
    async_stream::stream! {
        // Thinking frames arrive while retrieval is still running; the
        // channel closing means the producer is done.
        while let Some(step) = thinking_rx.recv().await {
            yield Event::default().json_data(json!({ "type": "thinking", "step": step }));
        }

        let outcome = match tokio::time::timeout(RETRIEVAL_JOIN_TIMEOUT, retrieval_task).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(err))) => {
                error!(error = %err, "retrieval failed");
                yield Event::default().json_data(json!({
                    "type": "error",
                    "message": err.to_string(),
                }));
                return;
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "retrieval task panicked");
                yield Event::default().json_data(json!({
                    "type": "error",
                    "message": "Retrieval failed unexpectedly",
                }));
                return;
            }
            Err(_elapsed) => {
                error!("retrieval task exceeded the join ceiling");
                yield Event::default().json_data(json!({
                    "type": "error",
                    "message": "Retrieval timed out",
                }));
                return;
            }
        };

        // No usable context still ends the stream successfully.
        if outcome.contexts.is_empty() {
            let assistant_message = Message::new(
                request.chat_id.clone(),
                MessageRole::Assistant,
                NO_CONTEXT_ANSWER.to_string(),
            );
            let message_id = assistant_message.id.clone();
            if let Err(err) = state.db.store_item(assistant_message).await {
                error!(error = %err, "failed to persist empty-retrieval answer");
            }

            yield Event::default().json_data(json!({
                "type": "end",
                "content": NO_CONTEXT_ANSWER,
                "sources": [],
                "message_id": message_id,
            }));
            return;
        }

        let mut tokens = match state
            .rag_engine
            .generate_answer_stream(&request.query, &outcome.contexts, &chat_history)
            .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                error!(error = %err, "answer stream setup failed");
                yield Event::default().json_data(json!({
                    "type": "error",
                    "message": err.to_string(),
                }));
                return;
            }
        };

        let mut accumulated = String::new();
        while let Some(token) = tokens.next().await {
            match token {
                Ok(token) if !token.is_empty() => {
                    accumulated.push_str(&token);
                    yield Event::default().json_data(json!({
                        "type": "chunk",
                        "content": token,
                    }));
                }
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "answer stream failed mid-flight");
                    yield Event::default().json_data(json!({
                        "type": "error",
                        "message": err.to_string(),
                    }));
                    return;
                }
            }
        }

        let assistant_message = Message::new(
            request.chat_id.clone(),
            MessageRole::Assistant,
            accumulated.clone(),
        );
        let message_id = assistant_message.id.clone();
        if let Err(err) = state.db.store_item(assistant_message).await {
            error!(error = %err, "failed to persist assistant answer");
        }
        if let Err(err) = Chat::touch(&request.chat_id, &state.db).await {
            error!(error = %err, "failed to touch chat after answer");
        }

        yield Event::default().json_data(json!({
            "type": "end",
            "content": accumulated,
            "sources": outcome.sources,
            "message_id": message_id,
        }));
    }
}
