//! Cross-encoder reranking behind a small engine pool. Scoring runs on
//! fastembed `TextRerank` instances; the adaptive threshold decides how many
//! of the scored chunks survive.

pub mod threshold;

use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::available_parallelism,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::config::AppConfig,
    vector::ChunkHit,
};
use fastembed::{RerankInitOptions, RerankResult, RerankerModel, TextRerank};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use threshold::dynamic_threshold;

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

/// Scoring capability used by the RAG orchestrator. The pool implements it;
/// tests can substitute deterministic scorers.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        hits: Vec<ChunkHit>,
        top_k: usize,
        apply_threshold: bool,
    ) -> Result<Vec<ChunkHit>, AppError>;
}

pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Build the pool at startup. `pool_size` controls max parallel reranks.
    pub fn new(pool_size: usize, options: RerankInitOptions) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "reranking pool size must be greater than zero".to_string(),
            ));
        }

        fs::create_dir_all(&options.cache_dir)?;

        let mut engines = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            debug!("Creating reranking engine: {index}");
            let model = TextRerank::try_new(options.clone())
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    pub fn from_config(config: &AppConfig) -> Result<Arc<Self>, AppError> {
        let pool_size = config.reranking_pool_size.unwrap_or_else(default_pool_size);

        let mut options = RerankInitOptions::default();
        options.model_name = resolve_model(&config.reranker_model);
        options.show_download_progress = false;
        options.cache_dir = config
            .fastembed_cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&config.data_dir).join("fastembed"))
            .join("reranker");

        Self::new(pool_size, options)
    }

    /// Check out capacity plus an engine. The permit enforces backpressure.
    pub async fn checkout(&self) -> Result<RerankerLease, AppError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("reranker pool closed".to_string()))?;

        let idx = pick_engine_index(self.engines.len());
        let engine = Arc::clone(&self.engines[idx]);

        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }
}

#[async_trait]
impl Reranker for RerankerPool {
    async fn rerank(
        &self,
        query: &str,
        mut hits: Vec<ChunkHit>,
        top_k: usize,
        apply_threshold: bool,
    ) -> Result<Vec<ChunkHit>, AppError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = hits.iter().map(|hit| hit.text.clone()).collect();
        let lease = self.checkout().await?;
        let scored = lease.score(query, documents).await?;

        for result in scored {
            if let Some(hit) = hits.get_mut(result.index) {
                hit.rerank_score = Some(result.score);
            }
        }

        Ok(finalize_ranking(hits, top_k, apply_threshold))
    }
}

fn default_pool_size() -> usize {
    available_parallelism()
        .map(|value| value.get().min(2))
        .unwrap_or(2)
        .max(1)
}

fn resolve_model(name: &str) -> RerankerModel {
    match name {
        "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
        "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
        other => {
            warn!(
                model = other,
                "unknown reranker model, falling back to bge-reranker-v2-m3"
            );
            RerankerModel::BGERerankerV2M3
        }
    }
}

/// Active lease on a single TextRerank instance.
pub struct RerankerLease {
    // When this drops the semaphore permit is released.
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    pub async fn score(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<RerankResult>, AppError> {
        // Lock this specific engine so we get &mut TextRerank.
        let mut guard = self.engine.lock().await;

        guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|e| AppError::InternalError(e.to_string()))
    }
}

/// Sort scored hits descending and apply the adaptive threshold.
///
/// With `apply_threshold` the filtered list's head carries `threshold_used`
/// and `threshold_reason`; when everything falls below the cutoff the single
/// best hit is returned with reason `fallback_below_threshold`.
pub fn finalize_ranking(
    mut hits: Vec<ChunkHit>,
    top_k: usize,
    apply_threshold: bool,
) -> Vec<ChunkHit> {
    if hits.is_empty() {
        return hits;
    }

    hits.sort_by(|a, b| {
        b.rerank_score
            .unwrap_or(0.0)
            .partial_cmp(&a.rerank_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if !apply_threshold {
        hits.truncate(top_k);
        return hits;
    }

    let scores: Vec<f32> = hits
        .iter()
        .map(|hit| hit.rerank_score.unwrap_or(0.0))
        .collect();
    let (cutoff, reason) = dynamic_threshold(&scores);

    let mut filtered: Vec<ChunkHit> = hits
        .iter()
        .filter(|hit| hit.rerank_score.unwrap_or(0.0) >= cutoff)
        .cloned()
        .collect();

    if let Some(first) = filtered.first_mut() {
        first.threshold_used = Some(cutoff);
        first.threshold_reason = Some(reason.to_string());
        filtered.truncate(top_k);
        return filtered;
    }

    // Nothing survived: keep the single best hit rather than nothing.
    let mut fallback = hits;
    fallback.truncate(1);
    if let Some(first) = fallback.first_mut() {
        first.threshold_used = Some(cutoff);
        first.threshold_reason = Some("fallback_below_threshold".to_string());
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc_id: &str, chunk_id: i64, score: f32) -> ChunkHit {
        ChunkHit {
            text: format!("chunk {chunk_id} of {doc_id}"),
            doc_id: doc_id.to_string(),
            chunk_id,
            parent_id: Some(chunk_id),
            document_name: format!("{doc_id}.pdf"),
            section: "Body".to_string(),
            position: "middle".to_string(),
            chunk_index: Some(chunk_id),
            total_chunks: Some(10),
            score: 0.0,
            rerank_score: Some(score),
            is_metadata_injection: false,
            metadata_priority: false,
            threshold_used: None,
            threshold_reason: None,
        }
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(finalize_ranking(Vec::new(), 5, true).is_empty());
    }

    #[test]
    fn clear_winner_returns_only_the_top_document() {
        let hits = vec![
            hit("a", 0, 0.9),
            hit("a", 1, 0.55),
            hit("b", 0, 0.54),
            hit("b", 1, 0.50),
            hit("c", 0, 0.48),
        ];

        let ranked = finalize_ranking(hits, 5, true);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rerank_score, Some(0.9));
        assert_eq!(ranked[0].threshold_reason.as_deref(), Some("clear_winner"));
    }

    #[test]
    fn fallback_keeps_single_best_when_all_below_cutoff() {
        // A lone score below the base threshold survives as the fallback.
        let hits = vec![hit("a", 0, 0.1)];

        let ranked = finalize_ranking(hits, 5, true);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rerank_score, Some(0.1));
        assert_eq!(
            ranked[0].threshold_reason.as_deref(),
            Some("fallback_below_threshold")
        );
    }

    #[test]
    fn high_variance_scores_are_cut_at_the_mean() {
        let hits = vec![hit("a", 0, 0.49), hit("a", 1, 0.45), hit("b", 0, 0.02)];

        let ranked = finalize_ranking(hits, 5, true);

        // Mean is ~0.32: the two strong chunks survive, the stray one drops.
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].threshold_reason.as_deref(), Some("high_variance"));
    }

    #[test]
    fn without_threshold_returns_sorted_top_k() {
        let hits = vec![hit("a", 0, 0.1), hit("b", 0, 0.8), hit("c", 0, 0.4)];

        let ranked = finalize_ranking(hits, 2, false);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].rerank_score, Some(0.8));
        assert_eq!(ranked[1].rerank_score, Some(0.4));
        assert!(ranked[0].threshold_reason.is_none());
    }

    #[test]
    fn reranking_an_already_ranked_list_is_idempotent() {
        let hits = vec![hit("a", 0, 0.7), hit("b", 0, 0.6), hit("c", 0, 0.5)];

        let once = finalize_ranking(hits, 3, false);
        let twice = finalize_ranking(once.clone(), 3, false);

        let order_once: Vec<(String, i64)> = once.iter().map(ChunkHit::chunk_key).collect();
        let order_twice: Vec<(String, i64)> = twice.iter().map(ChunkHit::chunk_key).collect();
        assert_eq!(order_once, order_twice);
    }

    #[test]
    fn equal_scores_keep_stable_order() {
        let hits = vec![hit("a", 0, 0.5), hit("b", 0, 0.5), hit("c", 0, 0.5)];

        let ranked = finalize_ranking(hits, 3, false);
        let docs: Vec<&str> = ranked.iter().map(|hit| hit.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["a", "b", "c"]);
    }
}
