//! Multi-round RAG orchestrator: LLM query expansion, hybrid retrieval,
//! cross-encoder reranking, metadata injection and parent-context assembly
//! with neighbor windowing.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use common::{
    error::AppError,
    llm::{ChatMessage, LlmClient, TokenStream},
    storage::{
        db::SurrealDbClient,
        parent_store,
        types::{
            document::Document,
            message::{Message, MessageRole},
        },
    },
    utils::config::AppConfig,
    vector::{ChunkHit, VectorStore},
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::{
    expansion::{
        cached_query_variations, excerpt_for_refinement, generate_variations,
        ALTERNATIVE_QUERY_PROMPT, QueryExpansionCache, REFINEMENT_QUERY_PROMPT,
    },
    reranking::Reranker,
    SourceRef, ThinkingStep,
};

/// Below this the round is considered a miss and another round is attempted.
pub const MIN_ACCEPTABLE_RERANK_SCORE: f32 = 0.4;
/// At or above this retrieval stops early.
pub const GOOD_RERANK_SCORE: f32 = 0.5;

const REFINEMENT_EXCERPT_CHARS: usize = 500;
const NEIGHBOR_PREVIOUS_MULTIPLIER: f32 = 0.95;
const NEIGHBOR_FOLLOWING_MULTIPLIER: f32 = 0.98;
const HISTORY_MESSAGE_LIMIT: usize = 5;
const METADATA_SECTION: &str = "Document Metadata";

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. \
Use the context to answer the question accurately. If the context doesn't contain \
enough information to answer the question, say so.";

/// Canned assistant reply when retrieval produced no usable context.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the documents to answer your question.";

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    pub contexts: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub thinking: Vec<ThinkingStep>,
}

pub struct RagEngine {
    db: Arc<SurrealDbClient>,
    vector_store: Arc<VectorStore>,
    llm: Arc<dyn LlmClient>,
    reranker: Arc<dyn Reranker>,
    expansion_cache: QueryExpansionCache,
    config: AppConfig,
}

/// Collects thinking steps and forwards them to the live channel when one is
/// attached.
struct ThinkingTrace {
    steps: Vec<ThinkingStep>,
    tx: Option<mpsc::Sender<ThinkingStep>>,
}

impl ThinkingTrace {
    fn new(tx: Option<mpsc::Sender<ThinkingStep>>) -> Self {
        Self {
            steps: Vec::new(),
            tx,
        }
    }

    async fn emit(&mut self, step: ThinkingStep) {
        self.steps.push(step.clone());
        if let Some(tx) = &self.tx {
            // A disconnected consumer must not fail retrieval.
            let _ = tx.send(step).await;
        }
    }
}

impl RagEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vector_store: Arc<VectorStore>,
        llm: Arc<dyn LlmClient>,
        reranker: Arc<dyn Reranker>,
        config: AppConfig,
    ) -> Self {
        let expansion_cache = QueryExpansionCache::new(
            config.query_expansion_cache_size,
            std::time::Duration::from_secs(config.query_expansion_cache_ttl_secs),
        );

        Self {
            db,
            vector_store,
            llm,
            reranker,
            expansion_cache,
            config,
        }
    }

    /// Up to three retrieval rounds with accumulated, deduplicated chunks.
    /// Thinking steps stream through `on_thinking` as they happen and are
    /// also returned with the final outcome.
    #[instrument(skip_all, fields(query_chars = query.chars().count()))]
    pub async fn multi_query_retrieve_and_rerank(
        &self,
        query: &str,
        doc_collection_map: &HashMap<String, String>,
        on_thinking: Option<mpsc::Sender<ThinkingStep>>,
    ) -> Result<RetrievalOutcome, AppError> {
        let mut trace = ThinkingTrace::new(on_thinking);
        let mut all_chunks: Vec<ChunkHit> = Vec::new();
        let mut seen: HashSet<(String, i64)> = HashSet::new();

        trace
            .emit(ThinkingStep::new("start", "Starting multi-query retrieval..."))
            .await;

        // Round 1: cached query variations.
        trace
            .emit(ThinkingStep::new(
                "round1_start",
                "Round 1: generating 3 query variations...",
            ))
            .await;

        let (variations, from_cache) =
            cached_query_variations(&self.expansion_cache, self.llm.as_ref(), query).await;
        trace
            .emit(ThinkingStep::with_details(
                "queries_generated",
                if from_cache {
                    "Reusing cached query variations"
                } else {
                    "Generated query variations"
                },
                json!(variations),
            ))
            .await;

        self.search_variations(&variations, doc_collection_map, &mut all_chunks, &mut seen, &mut trace)
            .await;
        trace
            .emit(ThinkingStep::new(
                "deduplication",
                format!("Total unique chunks after deduplication: {}", all_chunks.len()),
            ))
            .await;

        self.inject_metadata_chunks(doc_collection_map, &mut all_chunks, &mut seen)
            .await;

        let mut reranked = self
            .rerank_accumulated(query, &all_chunks, &mut trace, "rerank_complete")
            .await?;
        let mut best_score = top_score(&reranked);

        // At GOOD this is the early exit; between MIN_ACCEPTABLE and GOOD
        // the results are kept without spending another round.
        if best_score >= MIN_ACCEPTABLE_RERANK_SCORE {
            return self.finish(reranked, trace).await;
        }

        // Round 2: alternative formulations.
        trace
            .emit(ThinkingStep::new(
                "round2_start",
                "Round 2: generating alternative query formulations...",
            ))
            .await;

        let alternatives =
            generate_variations(self.llm.as_ref(), ALTERNATIVE_QUERY_PROMPT, query, None).await;
        trace
            .emit(ThinkingStep::with_details(
                "queries_generated",
                "Generated alternative queries",
                json!(alternatives),
            ))
            .await;

        self.search_variations(&alternatives, doc_collection_map, &mut all_chunks, &mut seen, &mut trace)
            .await;
        self.inject_metadata_chunks(doc_collection_map, &mut all_chunks, &mut seen)
            .await;

        let round2 = self
            .rerank_accumulated(query, &all_chunks, &mut trace, "rerank_complete")
            .await?;
        let round2_best = top_score(&round2);
        let improvement = round2_best - best_score;
        reranked = round2;
        best_score = round2_best;

        if best_score >= GOOD_RERANK_SCORE || improvement <= 0.0 {
            return self.finish(reranked, trace).await;
        }

        // Round 3: refine using the best passage found so far.
        trace
            .emit(ThinkingStep::new(
                "round3_start",
                "Round 3: refining queries with the best passage so far...",
            ))
            .await;

        let excerpt = reranked
            .first()
            .map(|chunk| excerpt_for_refinement(&chunk.text, REFINEMENT_EXCERPT_CHARS))
            .unwrap_or_default();
        let refined = generate_variations(
            self.llm.as_ref(),
            REFINEMENT_QUERY_PROMPT,
            query,
            Some(&excerpt),
        )
        .await;
        trace
            .emit(ThinkingStep::with_details(
                "queries_generated",
                "Generated refinement queries",
                json!(refined),
            ))
            .await;

        self.search_variations(&refined, doc_collection_map, &mut all_chunks, &mut seen, &mut trace)
            .await;
        self.inject_metadata_chunks(doc_collection_map, &mut all_chunks, &mut seen)
            .await;

        let final_ranked = self
            .rerank_accumulated(query, &all_chunks, &mut trace, "final_rerank_complete")
            .await?;

        self.finish(final_ranked, trace).await
    }

    /// Token stream for the final answer; the message list carries the system
    /// prompt, recent history and the numbered contexts.
    pub async fn generate_answer_stream(
        &self,
        query: &str,
        contexts: &[String],
        chat_history: &[Message],
    ) -> Result<TokenStream, AppError> {
        let messages = build_answer_messages(query, contexts, chat_history);
        self.llm.stream(&messages).await
    }

    async fn search_variations(
        &self,
        variations: &[String],
        doc_collection_map: &HashMap<String, String>,
        all_chunks: &mut Vec<ChunkHit>,
        seen: &mut HashSet<(String, i64)>,
        trace: &mut ThinkingTrace,
    ) {
        for (index, variation) in variations.iter().enumerate() {
            let preview: String = variation.chars().take(80).collect();
            trace
                .emit(ThinkingStep::new(
                    "searching",
                    format!("Searching with query {}: \"{preview}\"", index + 1),
                ))
                .await;

            match self
                .vector_store
                .search(variation, doc_collection_map, self.config.top_k_retrieval)
                .await
            {
                Ok(chunks) => {
                    let found = chunks.len();
                    for chunk in chunks {
                        if seen.insert(chunk.chunk_key()) {
                            all_chunks.push(chunk);
                        }
                    }
                    trace
                        .emit(ThinkingStep::new(
                            "search_complete",
                            format!("Query {} returned {found} chunks", index + 1),
                        ))
                        .await;
                }
                Err(err) => {
                    warn!(error = %err, "search failed for query variation");
                    trace
                        .emit(ThinkingStep::new(
                            "search_complete",
                            format!("Query {} failed: {err}", index + 1),
                        ))
                        .await;
                }
            }
        }
    }

    /// Make sure every document present in the accumulated set contributes
    /// its metadata chunk, so bibliographic questions can be answered even
    /// when similarity search missed it.
    async fn inject_metadata_chunks(
        &self,
        doc_collection_map: &HashMap<String, String>,
        all_chunks: &mut Vec<ChunkHit>,
        seen: &mut HashSet<(String, i64)>,
    ) {
        let docs_in_results: HashSet<String> =
            all_chunks.iter().map(|chunk| chunk.doc_id.clone()).collect();
        let docs_with_metadata: HashSet<String> = all_chunks
            .iter()
            .filter(|chunk| chunk.section == METADATA_SECTION)
            .map(|chunk| chunk.doc_id.clone())
            .collect();

        let target_map: HashMap<String, String> = doc_collection_map
            .iter()
            .filter(|(doc_id, _)| {
                docs_in_results.contains(doc_id.as_str()) && !docs_with_metadata.contains(doc_id.as_str())
            })
            .map(|(doc_id, collection)| (doc_id.clone(), collection.clone()))
            .collect();

        if target_map.is_empty() {
            return;
        }

        match self.vector_store.get_metadata_chunks_for_docs(&target_map).await {
            Ok(metadata_chunks) => {
                for mut chunk in metadata_chunks {
                    chunk.metadata_priority = true;
                    if seen.insert(chunk.chunk_key()) {
                        all_chunks.push(chunk);
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "metadata chunk injection failed");
            }
        }
    }

    async fn rerank_accumulated(
        &self,
        query: &str,
        all_chunks: &[ChunkHit],
        trace: &mut ThinkingTrace,
        step_type: &str,
    ) -> Result<Vec<ChunkHit>, AppError> {
        trace
            .emit(ThinkingStep::new(
                "reranking",
                format!("Reranking {} chunks...", all_chunks.len()),
            ))
            .await;

        let reranked = self
            .reranker
            .rerank(query, all_chunks.to_vec(), self.config.top_k_rerank, true)
            .await?;

        let preview: Vec<serde_json::Value> = reranked
            .iter()
            .take(3)
            .map(|chunk| {
                json!({
                    "text": chunk.text.chars().take(100).collect::<String>(),
                    "score": chunk.rerank_score.unwrap_or(0.0),
                })
            })
            .collect();
        trace
            .emit(ThinkingStep::with_details(
                step_type,
                format!("Best rerank score: {:.3}", top_score(&reranked)),
                json!(preview),
            ))
            .await;

        Ok(reranked)
    }

    async fn finish(
        &self,
        reranked: Vec<ChunkHit>,
        mut trace: ThinkingTrace,
    ) -> Result<RetrievalOutcome, AppError> {
        if reranked.is_empty() {
            trace
                .emit(ThinkingStep::new(
                    "no_results_final",
                    "No relevant chunks found in any round",
                ))
                .await;
            return Ok(RetrievalOutcome {
                contexts: Vec::new(),
                sources: Vec::new(),
                thinking: trace.steps,
            });
        }

        trace
            .emit(ThinkingStep::new("loading_parents", "Loading parent documents..."))
            .await;

        let (contexts, sources) = self.load_parents_from_chunks(&reranked).await?;

        trace
            .emit(ThinkingStep::new(
                "complete",
                format!("Retrieved {} parent contexts", contexts.len()),
            ))
            .await;

        info!(
            contexts = contexts.len(),
            sources = sources.len(),
            "retrieval complete"
        );

        Ok(RetrievalOutcome {
            contexts,
            sources,
            thinking: trace.steps,
        })
    }

    async fn load_parents_from_chunks(
        &self,
        reranked: &[ChunkHit],
    ) -> Result<(Vec<String>, Vec<SourceRef>), AppError> {
        let mut documents: HashMap<String, Document> = HashMap::new();
        for chunk in reranked {
            if documents.contains_key(&chunk.doc_id) {
                continue;
            }
            if let Some(document) = self.db.get_item::<Document>(&chunk.doc_id).await? {
                documents.insert(chunk.doc_id.clone(), document);
            }
        }

        let entries = assemble_parent_entries(
            reranked,
            &documents,
            self.config.top_k_rerank,
            self.config.enable_neighbor_expansion,
            self.config.neighbor_expansion_window,
        );

        let contexts = entries.iter().map(|entry| entry.text.clone()).collect();
        let sources = entries.iter().map(source_ref_for_entry).collect();

        Ok((contexts, sources))
    }
}

fn top_score(reranked: &[ChunkHit]) -> f32 {
    reranked
        .first()
        .and_then(|chunk| chunk.rerank_score)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone)]
pub struct ParentEntry {
    pub doc_id: String,
    pub parent_id: i64,
    pub text: String,
    pub score: f32,
    pub section: String,
    pub document_name: String,
    pub is_neighbor: bool,
    pub neighbor_direction: i32,
}

/// Walk reranked chunks into unique parent contexts, then widen with
/// neighboring parents when there is room left.
pub fn assemble_parent_entries(
    reranked: &[ChunkHit],
    documents: &HashMap<String, Document>,
    top_k_rerank: usize,
    enable_neighbor_expansion: bool,
    neighbor_expansion_window: i64,
) -> Vec<ParentEntry> {
    let mut seen: HashSet<(String, i64)> = HashSet::new();
    let mut entries: Vec<ParentEntry> = Vec::new();

    for chunk in reranked {
        if entries.len() >= top_k_rerank {
            break;
        }

        let Some(parent_id) = chunk.parent_id else {
            continue;
        };
        if !seen.insert((chunk.doc_id.clone(), parent_id)) {
            continue;
        }

        let Some(text) = load_parent_text(documents, &chunk.doc_id, parent_id) else {
            continue;
        };

        entries.push(ParentEntry {
            doc_id: chunk.doc_id.clone(),
            parent_id,
            text,
            score: chunk.rerank_score.unwrap_or(chunk.score),
            section: chunk.section.clone(),
            document_name: document_display_name(documents, chunk),
            is_neighbor: false,
            neighbor_direction: 0,
        });
    }

    let mut added_neighbor = false;
    if enable_neighbor_expansion
        && neighbor_expansion_window > 0
        && entries.len() < top_k_rerank
    {
        let base_entries: Vec<ParentEntry> = entries.clone();

        'bases: for base in &base_entries {
            // One step back first, then the forward window.
            let previous_id = base.parent_id - 1;
            if previous_id >= 0 {
                added_neighbor |= try_add_neighbor(
                    &mut entries,
                    &mut seen,
                    documents,
                    base,
                    previous_id,
                    base.score * NEIGHBOR_PREVIOUS_MULTIPLIER,
                    -1,
                );
                if entries.len() >= top_k_rerank {
                    break 'bases;
                }
            }

            for offset in 1..=neighbor_expansion_window {
                added_neighbor |= try_add_neighbor(
                    &mut entries,
                    &mut seen,
                    documents,
                    base,
                    base.parent_id + offset,
                    base.score * NEIGHBOR_FOLLOWING_MULTIPLIER,
                    1,
                );
                if entries.len() >= top_k_rerank {
                    break 'bases;
                }
            }
        }
    }

    if added_neighbor {
        // Reading order: documents in first-appearance order, parents
        // ascending within each document.
        let mut doc_order: HashMap<String, usize> = HashMap::new();
        for entry in &entries {
            let next = doc_order.len();
            doc_order.entry(entry.doc_id.clone()).or_insert(next);
        }
        entries.sort_by_key(|entry| (doc_order[&entry.doc_id], entry.parent_id));
    }

    entries
}

#[allow(clippy::too_many_arguments)]
fn try_add_neighbor(
    entries: &mut Vec<ParentEntry>,
    seen: &mut HashSet<(String, i64)>,
    documents: &HashMap<String, Document>,
    base: &ParentEntry,
    parent_id: i64,
    score: f32,
    direction: i32,
) -> bool {
    if !seen.insert((base.doc_id.clone(), parent_id)) {
        return false;
    }

    let Some(text) = load_parent_text(documents, &base.doc_id, parent_id) else {
        return false;
    };

    entries.push(ParentEntry {
        doc_id: base.doc_id.clone(),
        parent_id,
        text,
        score,
        section: base.section.clone(),
        document_name: base.document_name.clone(),
        is_neighbor: true,
        neighbor_direction: direction,
    });

    true
}

fn load_parent_text(
    documents: &HashMap<String, Document>,
    doc_id: &str,
    parent_id: i64,
) -> Option<String> {
    let document = documents.get(doc_id)?;
    let store_path = document.parent_store_path.as_ref()?;

    match parent_store::load_parent(Path::new(store_path), parent_id) {
        Ok(Some(text)) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(err) => {
            warn!(doc_id, parent_id, error = %err, "failed to load parent from side-store");
            None
        }
    }
}

fn document_display_name(documents: &HashMap<String, Document>, chunk: &ChunkHit) -> String {
    documents
        .get(&chunk.doc_id)
        .map(|document| document.file_name.clone())
        .unwrap_or_else(|| chunk.document_name.clone())
}

fn source_ref_for_entry(entry: &ParentEntry) -> SourceRef {
    SourceRef {
        label: source_label(entry),
        content: entry.text.trim().to_string(),
        document: entry.document_name.clone(),
        section: if entry.section.is_empty() {
            None
        } else {
            Some(entry.section.clone())
        },
        score: entry.score,
    }
}

fn source_label(entry: &ParentEntry) -> String {
    let mut parts = vec![entry.document_name.clone()];

    if !entry.section.is_empty() {
        parts.push(format!("§ {}", entry.section));
    }

    if entry.is_neighbor {
        parts.push(
            if entry.neighbor_direction < 0 {
                "Vorabschnitt"
            } else {
                "Folgeabschnitt"
            }
            .to_string(),
        );
    }

    parts.push(format!("(Relevanz: {:.0}%)", entry.score * 100.0));
    parts.join(" - ")
}

/// System prompt, up to five most recent history messages with their roles
/// preserved, then the numbered contexts and the question.
pub fn build_answer_messages(
    query: &str,
    contexts: &[String],
    chat_history: &[Message],
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(ANSWER_SYSTEM_PROMPT)];

    let skip = chat_history.len().saturating_sub(HISTORY_MESSAGE_LIMIT);
    for entry in chat_history.iter().skip(skip) {
        match entry.role {
            MessageRole::User => messages.push(ChatMessage::user(entry.content.clone())),
            MessageRole::Assistant => {
                messages.push(ChatMessage::assistant(entry.content.clone()));
            }
        }
    }

    let context_str = contexts
        .iter()
        .enumerate()
        .map(|(index, context)| format!("Context {}:\n{}", index + 1, context))
        .collect::<Vec<_>>()
        .join("\n\n");

    messages.push(ChatMessage::user(format!(
        "Context:\n{context_str}\n\nQuestion: {query}"
    )));

    messages
}
