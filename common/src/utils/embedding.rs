//! Dense embedding provider with an LRU cache in front of the encoder.
//!
//! The neural encoder is opaque to callers: they see `embed_text`,
//! `embed_batch` and `dimension()`. A deterministic hashed backend exists so
//! tests and evaluations run without model downloads.

use std::{
    num::NonZeroUsize,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Mutex,
};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

const HASHED_DEFAULT_DIMENSION: usize = 384;

enum Backend {
    FastEmbed(tokio::sync::Mutex<TextEmbedding>),
    Hashed { dimension: usize },
}

pub struct EmbeddingService {
    backend: Backend,
    dimension: usize,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl EmbeddingService {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::Fastembed => {
                let model = resolve_model(&config.embedding_model);
                let dimension = config.embedding_dimension.unwrap_or_else(|| {
                    TextEmbedding::get_model_info(&model)
                        .map(|info| info.dim)
                        .unwrap_or(HASHED_DEFAULT_DIMENSION)
                });

                let cache_dir = config
                    .fastembed_cache_dir
                    .clone()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&config.data_dir).join("fastembed"));
                std::fs::create_dir_all(&cache_dir)?;

                let options = InitOptions::new(model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(false);
                let encoder = TextEmbedding::try_new(options)
                    .map_err(|e| AppError::InternalError(e.to_string()))?;

                Ok(Self::with_backend(
                    Backend::FastEmbed(tokio::sync::Mutex::new(encoder)),
                    dimension,
                    config.embedding_cache_size,
                ))
            }
            EmbeddingBackend::Hashed => Ok(Self::new_hashed(
                config.embedding_dimension.unwrap_or(HASHED_DEFAULT_DIMENSION),
                config.embedding_cache_size,
            )),
        }
    }

    /// Deterministic embedding backend for tests and offline evaluation.
    pub fn new_hashed(dimension: usize, cache_size: usize) -> Self {
        Self::with_backend(Backend::Hashed { dimension }, dimension, cache_size)
    }

    fn with_backend(backend: Backend, dimension: usize, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            dimension,
            cache: Mutex::new(LruCache::new(capacity)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// One synthetic encode to force model load before serving traffic.
    pub async fn warmup(&self) -> Result<(), AppError> {
        let vector = self.encode_uncached(&["warmup".to_string()]).await?;
        debug!(
            dimension = vector.first().map(Vec::len).unwrap_or_default(),
            "embedding encoder warmed up"
        );
        Ok(())
    }

    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let key = cache_key(text);

        if let Some(cached) = self.cache_get(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let mut vectors = self.encode_uncached(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| AppError::InternalError("encoder returned no embedding".into()))?;

        self.cache_put(key, vector.clone());
        Ok(vector)
    }

    /// Batch encode: cache hits are served from memory, only misses reach the
    /// encoder, and results come back in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for (position, text) in texts.iter().enumerate() {
            let key = cache_key(text);
            if let Some(cached) = self.cache_get(&key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                results[position] = Some(cached);
            } else {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                miss_indices.push(position);
                miss_texts.push(text.clone());
            }
        }

        if !miss_texts.is_empty() {
            let encoded = self.encode_uncached(&miss_texts).await?;
            if encoded.len() != miss_texts.len() {
                return Err(AppError::InternalError(format!(
                    "encoder returned {} embeddings for {} inputs",
                    encoded.len(),
                    miss_texts.len()
                )));
            }

            for (position, vector) in miss_indices.iter().zip(encoded) {
                self.cache_put(cache_key(&texts[*position]), vector.clone());
                results[*position] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|vector| {
                vector.ok_or_else(|| {
                    AppError::InternalError("embedding batch left a gap".to_string())
                })
            })
            .collect()
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        self.cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(key).cloned())
    }

    fn cache_put(&self, key: String, vector: Vec<f32>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, vector);
        }
    }

    async fn encode_uncached(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.backend {
            Backend::FastEmbed(encoder) => {
                let mut guard = encoder.lock().await;
                guard
                    .embed(texts.to_vec(), None)
                    .map_err(|e| AppError::InternalError(e.to_string()))
            }
            Backend::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
        }
    }
}

fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn resolve_model(name: &str) -> EmbeddingModel {
    match name {
        "intfloat/multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
        "intfloat/multilingual-e5-base" => EmbeddingModel::MultilingualE5Base,
        "intfloat/multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
        "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        other => {
            warn!(
                model = other,
                "unknown embedding model, falling back to multilingual-e5-base"
            );
            EmbeddingModel::MultilingualE5Base
        }
    }
}

/// Deterministic bag-of-words embedding: tokens hashed into buckets, counts
/// accumulated, L2-normalized.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension.max(1)];

    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let index = (hash % vector.len() as u64) as usize;
        vector[index] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed_service() -> EmbeddingService {
        EmbeddingService::new_hashed(64, 16)
    }

    #[tokio::test]
    async fn repeated_embedding_is_cache_consistent() {
        let service = hashed_service();

        let first = service.embed_text("hello world").await.expect("embed");
        let second = service.embed_text("hello world").await.expect("embed");

        assert_eq!(first, second);
        let (hits, misses) = service.cache_stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[tokio::test]
    async fn batch_reassembles_hits_and_misses_in_order() {
        let service = hashed_service();

        let warm = service.embed_text("beta").await.expect("embed");

        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let batch = service.embed_batch(&texts).await.expect("batch");

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], warm);
        assert_eq!(batch[0], service.embed_text("alpha").await.expect("embed"));
        assert_eq!(batch[2], service.embed_text("gamma").await.expect("embed"));
    }

    #[tokio::test]
    async fn hashed_embeddings_are_normalized_and_sized() {
        let service = hashed_service();
        assert_eq!(service.dimension(), 64);

        let vector = service.embed_text("normalize me please").await.expect("embed");
        assert_eq!(vector.len(), 64);

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn warmup_succeeds_on_hashed_backend() {
        let service = hashed_service();
        service.warmup().await.expect("warmup");
    }
}
