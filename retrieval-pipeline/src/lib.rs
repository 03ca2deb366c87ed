#![allow(clippy::missing_docs_in_private_items)]

pub mod engine;
pub mod expansion;
pub mod reranking;

use serde::Serialize;

pub use engine::{RagEngine, RetrievalOutcome};
pub use expansion::QueryExpansionCache;
pub use reranking::{Reranker, RerankerPool};

/// Out-of-band retrieval progress, streamed to the client while the answer
/// is still being prepared.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThinkingStep {
    #[serde(rename = "type")]
    pub step_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ThinkingStep {
    pub fn new(step_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        step_type: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            step_type: step_type.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

/// One citation record handed to the client alongside the answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceRef {
    pub label: String,
    pub content: String,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub score: f32,
}
