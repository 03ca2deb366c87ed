use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    OpenAI,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Anthropic => write!(f, "anthropic"),
            LlmProvider::OpenAI => write!(f, "openai"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Fastembed,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    // LLM provider selection. When unset the active provider is inferred
    // from which API keys are present, with Ollama as the final fallback.
    #[serde(default)]
    pub llm_provider: Option<LlmProvider>,
    #[serde(default)]
    pub anthropic_api_key: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_dimension: Option<usize>,
    #[serde(default = "default_embedding_cache_size")]
    pub embedding_cache_size: usize,
    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,

    #[serde(default = "default_qdrant_host")]
    pub qdrant_host: String,
    #[serde(default = "default_qdrant_port")]
    pub qdrant_port: u16,
    #[serde(default)]
    pub qdrant_prefer_grpc: bool,
    #[serde(default = "default_collection_prefix")]
    pub qdrant_collection_prefix: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_parent_chunk_size")]
    pub parent_chunk_size: usize,
    #[serde(default = "default_parent_chunk_overlap")]
    pub parent_chunk_overlap: usize,
    #[serde(default = "default_child_chunk_size")]
    pub child_chunk_size: usize,
    #[serde(default = "default_child_chunk_overlap")]
    pub child_chunk_overlap: usize,

    #[serde(default = "default_top_k_retrieval")]
    pub top_k_retrieval: usize,
    #[serde(default = "default_top_k_rerank")]
    pub top_k_rerank: usize,
    #[serde(default = "default_true")]
    pub enable_neighbor_expansion: bool,
    #[serde(default = "default_neighbor_expansion_window")]
    pub neighbor_expansion_window: i64,

    #[serde(default = "default_query_expansion_cache_size")]
    pub query_expansion_cache_size: usize,
    #[serde(default = "default_query_expansion_cache_ttl_secs")]
    pub query_expansion_cache_ttl_secs: u64,

    #[serde(default)]
    pub use_llm_metadata_extraction: bool,

    #[serde(default = "default_worker_check_interval_secs")]
    pub worker_check_interval_secs: u64,

    #[serde(default)]
    pub zotero_api_key: String,
    #[serde(default)]
    pub zotero_library_id: String,
    #[serde(default = "default_zotero_library_type")]
    pub zotero_library_type: String,
    #[serde(default = "default_true")]
    pub zotero_auto_sync: bool,
    #[serde(default = "default_zotero_poll_interval_secs")]
    pub zotero_poll_interval_secs: u64,
}

impl AppConfig {
    /// Resolve the LLM provider: an explicit setting wins, otherwise prefer
    /// Anthropic when its key is present, then OpenAI, then Ollama.
    pub fn active_provider(&self) -> LlmProvider {
        if let Some(provider) = self.llm_provider {
            return provider;
        }
        if !self.anthropic_api_key.is_empty() {
            LlmProvider::Anthropic
        } else if !self.openai_api_key.is_empty() {
            LlmProvider::OpenAI
        } else {
            LlmProvider::Ollama
        }
    }

    pub fn qdrant_url(&self) -> String {
        format!("http://{}:{}", self.qdrant_host, self.qdrant_port)
    }

    pub fn upload_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("uploads")
    }

    /// Directory holding one parent-chunk side-store file per document.
    pub fn parent_store_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("parent_store")
    }

    pub fn zotero_download_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("zotero_downloads")
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.upload_dir())?;
        std::fs::create_dir_all(self.parent_store_dir())?;
        std::fs::create_dir_all(self.zotero_download_dir())?;
        Ok(())
    }
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "rag".to_string()
}

fn default_surrealdb_database() -> String {
    "rag".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama2".to_string()
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_llm_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Fastembed
}

fn default_embedding_model() -> String {
    "intfloat/multilingual-e5-base".to_string()
}

fn default_embedding_cache_size() -> usize {
    10_000
}

fn default_reranker_model() -> String {
    "BAAI/bge-reranker-v2-m3".to_string()
}

fn default_qdrant_host() -> String {
    "localhost".to_string()
}

fn default_qdrant_port() -> u16 {
    6333
}

fn default_collection_prefix() -> String {
    "doc_".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    180
}

fn default_parent_chunk_size() -> usize {
    2000
}

fn default_parent_chunk_overlap() -> usize {
    400
}

fn default_child_chunk_size() -> usize {
    400
}

fn default_child_chunk_overlap() -> usize {
    80
}

fn default_top_k_retrieval() -> usize {
    20
}

fn default_top_k_rerank() -> usize {
    6
}

fn default_true() -> bool {
    true
}

fn default_neighbor_expansion_window() -> i64 {
    4
}

fn default_query_expansion_cache_size() -> usize {
    1000
}

fn default_query_expansion_cache_ttl_secs() -> u64 {
    3600
}

fn default_worker_check_interval_secs() -> u64 {
    10
}

fn default_zotero_library_type() -> String {
    "user".to_string()
}

fn default_zotero_poll_interval_secs() -> u64 {
    60
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> AppConfig {
        let config = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .expect("override")
            .build()
            .expect("config");
        config.try_deserialize().expect("deserialize")
    }

    #[test]
    fn defaults_are_applied() {
        let config = minimal_config();

        assert_eq!(config.top_k_retrieval, 20);
        assert_eq!(config.top_k_rerank, 6);
        assert!(config.enable_neighbor_expansion);
        assert_eq!(config.neighbor_expansion_window, 4);
        assert_eq!(config.qdrant_collection_prefix, "doc_");
        assert_eq!(config.worker_check_interval_secs, 10);
        assert_eq!(config.zotero_poll_interval_secs, 60);
        assert!(!config.use_llm_metadata_extraction);
        assert_eq!(config.llm_timeout_secs, 60);
    }

    #[test]
    fn active_provider_prefers_explicit_setting() {
        let mut config = minimal_config();
        config.llm_provider = Some(LlmProvider::Ollama);
        config.anthropic_api_key = "key".to_string();

        assert_eq!(config.active_provider(), LlmProvider::Ollama);
    }

    #[test]
    fn active_provider_falls_back_by_available_keys() {
        let mut config = minimal_config();
        assert_eq!(config.active_provider(), LlmProvider::Ollama);

        config.openai_api_key = "sk-123".to_string();
        assert_eq!(config.active_provider(), LlmProvider::OpenAI);

        config.anthropic_api_key = "sk-ant".to_string();
        assert_eq!(config.active_provider(), LlmProvider::Anthropic);
    }

    #[test]
    fn directory_helpers_derive_from_data_dir() {
        let mut config = minimal_config();
        config.data_dir = "/tmp/ragdata".to_string();

        assert_eq!(config.upload_dir(), PathBuf::from("/tmp/ragdata/uploads"));
        assert_eq!(
            config.parent_store_dir(),
            PathBuf::from("/tmp/ragdata/parent_store")
        );
        assert_eq!(
            config.zotero_download_dir(),
            PathBuf::from("/tmp/ragdata/zotero_downloads")
        );
    }
}
