#![allow(clippy::missing_docs_in_private_items)]

pub mod api_state;
pub mod error;
mod routes;

use api_state::ApiState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use routes::{
    chats::{create_chat, delete_chat, get_chat, get_chat_messages, list_chats},
    documents::{
        delete_document, get_document, list_documents, processing_stream, reprocess_document,
        update_preferences, upload_document,
    },
    health::health,
    query_stream::query_stream,
    zotero,
};

const UPLOAD_BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// The REST + SSE surface of the service.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{chat_id}", get(get_chat).delete(delete_chat))
        .route("/chats/{chat_id}/messages", get(get_chat_messages))
        .route(
            "/documents",
            post(upload_document)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT_BYTES))
                .get(list_documents),
        )
        .route(
            "/documents/{doc_id}",
            get(get_document).delete(delete_document),
        )
        .route("/documents/{doc_id}/reprocess", post(reprocess_document))
        .route("/documents/{doc_id}/preferences", patch(update_preferences))
        .route(
            "/documents/{doc_id}/processing-stream",
            get(processing_stream),
        )
        .route("/query/stream", post(query_stream))
        .route("/zotero/sync", post(zotero::sync_all))
        .route("/zotero/sync/new", post(zotero::sync_new))
        .route("/zotero/status", get(zotero::status))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use common::{
        error::AppError,
        llm::{ChatMessage, LlmClient, TokenStream},
        observability::StatusRegistry,
        storage::{db::SurrealDbClient, types::document::Document},
        utils::{config::AppConfig, embedding::EmbeddingService},
        vector::{ChunkHit, VectorStore},
    };
    use http_body_util::BodyExt;
    use ingestion_pipeline::{
        worker::WorkerHandle,
        zotero::{client::ZoteroClient, sync::ZoteroSyncService},
    };
    use retrieval_pipeline::{RagEngine, Reranker};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, AppError> {
            Ok("q1\nq2\nq3".to_string())
        }

        async fn stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
            Err(AppError::Llm("not used".to_string()))
        }
    }

    struct StubReranker;

    #[async_trait]
    impl Reranker for StubReranker {
        async fn rerank(
            &self,
            _query: &str,
            mut hits: Vec<ChunkHit>,
            top_k: usize,
            _apply_threshold: bool,
        ) -> Result<Vec<ChunkHit>, AppError> {
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    async fn test_state() -> (ApiState, tempfile::TempDir) {
        test_state_with(
            "http://127.0.0.1:1".to_string(),
            Arc::new(StubLlm),
            Arc::new(StubReranker),
        )
        .await
    }

    async fn test_state_with(
        vector_base_url: String,
        llm: Arc<dyn LlmClient>,
        reranker: Arc<dyn Reranker>,
    ) -> (ApiState, tempfile::TempDir) {
        let data_dir = tempfile::tempdir().expect("tempdir");

        let raw = config::Config::builder()
            .set_override("surrealdb_address", "mem://")
            .expect("override")
            .set_override("data_dir", data_dir.path().to_string_lossy().into_owned())
            .expect("override")
            .build()
            .expect("config");
        let config: AppConfig = raw.try_deserialize().expect("deserialize");

        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("db"),
        );

        let embedder = Arc::new(EmbeddingService::new_hashed(8, 16));
        let vector_store = Arc::new(
            VectorStore::with_base_url(vector_base_url, "doc_".to_string(), embedder)
                .expect("vector store"),
        );

        let rag_engine = Arc::new(RagEngine::new(
            Arc::clone(&db),
            Arc::clone(&vector_store),
            Arc::clone(&llm),
            reranker,
            config.clone(),
        ));

        let zotero_client = Arc::new(
            ZoteroClient::with_base_url(
                "http://127.0.0.1:1".to_string(),
                String::new(),
                String::new(),
                "user".to_string(),
            )
            .expect("zotero client"),
        );
        let zotero_sync = Arc::new(ZoteroSyncService::new(
            Arc::clone(&zotero_client),
            Arc::clone(&db),
            config.zotero_download_dir(),
        ));

        let state = ApiState {
            db,
            config,
            vector_store,
            rag_engine,
            status: StatusRegistry::new(),
            worker: WorkerHandle::new(),
            zotero_client,
            zotero_sync,
        };

        (state, data_dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn chat_lifecycle_create_list_get_delete() {
        let (state, _dir) = test_state().await;
        let app = api_routes(state);

        let created = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/chats",
                serde_json::json!({"title": "Erster Chat"}),
            ))
            .await
            .expect("create response");
        assert_eq!(created.status(), StatusCode::OK);
        let created = body_json(created).await;
        let chat_id = created["id"].as_str().expect("chat id").to_string();
        assert_eq!(created["title"], "Erster Chat");

        let listed = app
            .clone()
            .oneshot(Request::get("/chats").body(Body::empty()).expect("request"))
            .await
            .expect("list response");
        assert_eq!(listed.status(), StatusCode::OK);
        let listed = body_json(listed).await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));

        let fetched = app
            .clone()
            .oneshot(
                Request::get(format!("/chats/{chat_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("get response");
        assert_eq!(fetched.status(), StatusCode::OK);

        let messages = app
            .clone()
            .oneshot(
                Request::get(format!("/chats/{chat_id}/messages"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("messages response");
        assert_eq!(messages.status(), StatusCode::OK);
        assert_eq!(body_json(messages).await.as_array().map(Vec::len), Some(0));

        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/chats/{chat_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("delete response");
        assert_eq!(deleted.status(), StatusCode::OK);
        assert_eq!(body_json(deleted).await["status"], "deleted");

        let missing = app
            .oneshot(
                Request::get(format!("/chats/{chat_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("missing response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await["detail"], "Chat not found");
    }

    #[tokio::test]
    async fn query_without_active_documents_is_a_400() {
        let (state, _dir) = test_state().await;
        let db = Arc::clone(&state.db);
        let app = api_routes(state);

        // A chat exists but the only document is disabled for querying.
        let chat = common::storage::types::chat::Chat::new("Chat".to_string());
        db.store_item(chat.clone()).await.expect("store chat");

        let mut document = Document::new("off.pdf".to_string(), "/x/off.pdf".to_string());
        document.processed = true;
        document.num_chunks = Some(2);
        document.query_enabled = false;
        db.store_item(document).await.expect("store document");

        let response = app
            .oneshot(json_request(
                "POST",
                "/query/stream",
                serde_json::json!({"chat_id": chat.id, "query": "Wer?"}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "No active documents selected for querying."
        );
    }

    #[tokio::test]
    async fn query_against_missing_chat_is_a_404() {
        let (state, _dir) = test_state().await;
        let app = api_routes(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/query/stream",
                serde_json::json!({"chat_id": "nope", "query": "Wer?"}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn document_preference_patch_toggles_query_enabled() {
        let (state, _dir) = test_state().await;
        let db = Arc::clone(&state.db);
        let app = api_routes(state);

        let document = Document::new("toggle.pdf".to_string(), "/x/toggle.pdf".to_string());
        db.store_item(document.clone()).await.expect("store");

        let response = app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/documents/{}/preferences", document.id),
                serde_json::json!({"query_enabled": false}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["query_enabled"], false);

        let missing = app
            .oneshot(json_request(
                "PATCH",
                "/documents/unknown/preferences",
                serde_json::json!({"query_enabled": true}),
            ))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn document_listing_reports_processing_marker() {
        let (state, _dir) = test_state().await;
        let db = Arc::clone(&state.db);
        let status = Arc::clone(&state.status);
        let app = api_routes(state);

        let document = Document::new("busy.pdf".to_string(), "/x/busy.pdf".to_string());
        db.store_item(document.clone()).await.expect("store");
        status.set_currently_processing(&document.id);

        let response = app
            .oneshot(
                Request::get("/documents")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let listed = body_json(response).await;
        assert_eq!(listed[0]["is_actively_processing"], true);
        assert_eq!(
            listed[0]["collection_name"],
            format!("doc_{}", document.id)
        );
    }

    #[tokio::test]
    async fn health_reports_document_count() {
        let (state, _dir) = test_state().await;
        let app = api_routes(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["vector_store"], "unreachable");
        assert_eq!(body["documents"], 0);
    }

    #[tokio::test]
    async fn zotero_status_reports_disabled_without_credentials() {
        let (state, _dir) = test_state().await;
        let app = api_routes(state);

        let response = app
            .oneshot(
                Request::get("/zotero/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["enabled"], false);
    }

    struct StreamingLlm;

    #[async_trait]
    impl LlmClient for StreamingLlm {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String, AppError> {
            Ok("variation a\nvariation b\nvariation c".to_string())
        }

        async fn stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream, AppError> {
            let tokens = futures::stream::iter(vec![
                Ok("Ada ".to_string()),
                Ok("wrote it.".to_string()),
            ]);
            Ok(Box::pin(tokens))
        }
    }

    struct GoodReranker;

    #[async_trait]
    impl Reranker for GoodReranker {
        async fn rerank(
            &self,
            _query: &str,
            mut hits: Vec<ChunkHit>,
            top_k: usize,
            _apply_threshold: bool,
        ) -> Result<Vec<ChunkHit>, AppError> {
            for hit in &mut hits {
                hit.rerank_score = Some(0.9);
            }
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    /// Frames of an SSE body: the JSON payload of every `data:` line.
    fn parse_sse_payloads(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect()
    }

    #[tokio::test]
    async fn query_stream_delivers_thinking_chunks_and_cited_end() {
        // Qdrant answering every hybrid query with the metadata chunk of a.pdf.
        let qdrant = httpmock::MockServer::start_async().await;
        qdrant
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path_contains("/collections/doc_");
                then.status(200)
                    .json_body(serde_json::json!({"result": {"config": {"params": {}}}}));
            })
            .await;

        let (state, data_dir) = test_state_with(
            qdrant.base_url(),
            Arc::new(StreamingLlm),
            Arc::new(GoodReranker),
        )
        .await;
        let db = Arc::clone(&state.db);

        // One processed document with its parent side-store on disk.
        let store_path = data_dir.path().join("doc_a.json");
        common::storage::parent_store::store_parents(
            &store_path,
            &["The author is Ada. Ada invented tables.".to_string()],
        )
        .expect("side store");

        let mut document = Document::new("a.pdf".to_string(), "/x/a.pdf".to_string());
        document.processed = true;
        document.num_chunks = Some(2);
        document.parent_store_path = Some(store_path.to_string_lossy().into_owned());
        let doc_id = document.id.clone();
        db.store_item(document).await.expect("store document");

        qdrant
            .mock_async({
                let doc_id = doc_id.clone();
                move |when, then| {
                    when.method(httpmock::Method::POST)
                        .path(format!("/collections/doc_{doc_id}/points/query"));
                    then.status(200).json_body(serde_json::json!({
                        "result": {
                            "points": [{
                                "id": "p0",
                                "score": 0.5,
                                "payload": {
                                    "doc_id": doc_id,
                                    "chunk_id": 0,
                                    "text": "=== DOCUMENT METADATA ===\nAuthor(s): Ada",
                                    "parent_id": 0,
                                    "document_name": "a.pdf",
                                    "section": "Document Metadata",
                                    "position": "metadata",
                                    "chunk_index": 0,
                                    "total_chunks": 2
                                }
                            }]
                        }
                    }));
                }
            })
            .await;

        let chat = common::storage::types::chat::Chat::new("Fragen".to_string());
        db.store_item(chat.clone()).await.expect("store chat");

        let app = api_routes(state);
        let response = app
            .oneshot(json_request(
                "POST",
                "/query/stream",
                serde_json::json!({"chat_id": chat.id, "query": "Who is the author?"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("text/event-stream")
        );

        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = String::from_utf8_lossy(&body);
        let payloads = parse_sse_payloads(&body);

        let thinking: Vec<&serde_json::Value> = payloads
            .iter()
            .filter(|frame| frame["type"] == "thinking")
            .collect();
        assert!(!thinking.is_empty(), "expected thinking frames, got: {body}");

        let chunks: String = payloads
            .iter()
            .filter(|frame| frame["type"] == "chunk")
            .filter_map(|frame| frame["content"].as_str())
            .collect();
        assert_eq!(chunks, "Ada wrote it.");

        let end = payloads
            .iter()
            .find(|frame| frame["type"] == "end")
            .expect("terminal end frame");
        assert_eq!(end["content"], "Ada wrote it.");
        assert_eq!(end["sources"][0]["document"], "a.pdf");
        assert_eq!(end["sources"][0]["section"], "Document Metadata");
        assert!(end["message_id"].is_string());

        // Both the user turn and the assistant answer were persisted.
        let messages =
            common::storage::types::message::Message::list_for_chat(&chat.id, &db)
                .await
                .expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Who is the author?");
        assert_eq!(messages[1].content, "Ada wrote it.");
    }
}
