//! Query expansion: LLM-generated search variants with a TTL-bounded LRU
//! cache keyed by the original question.

use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use common::llm::{ChatMessage, LlmClient};
use lru::LruCache;
use tracing::warn;

pub const VARIATION_COUNT: usize = 3;

pub const QUERY_EXPANSION_PROMPT: &str = "You are a query expansion assistant. Given a user question, generate exactly 3 different \
variations of the question that might help find relevant information. Each variation should \
approach the question from a different angle or use different keywords.\n\n\
Return ONLY the 3 queries, one per line, without numbering or bullets.";

pub const ALTERNATIVE_QUERY_PROMPT: &str = "The previous search queries did not find good results. Generate 3 completely different \
formulations of the question using synonyms, related concepts, or breaking down the question \
into sub-questions. Be creative and try different approaches.\n\n\
Return ONLY the 3 queries, one per line, without numbering or bullets.";

pub const REFINEMENT_QUERY_PROMPT: &str = "You refine search queries. The passage below is the most relevant text found so far for \
the user's question. Generate 3 more specific queries that dig deeper into this direction.\n\n\
Return ONLY the 3 queries, one per line, without numbering or bullets.";

struct CachedVariations {
    variations: Vec<String>,
    inserted_at: Instant,
}

/// TTL-bounded LRU of `original query -> 3 variants`.
pub struct QueryExpansionCache {
    entries: Mutex<LruCache<String, CachedVariations>>,
    ttl: Duration,
}

impl QueryExpansionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, query: &str) -> Option<Vec<String>> {
        let mut entries = self.entries.lock().ok()?;

        match entries.get(query) {
            Some(cached) if cached.inserted_at.elapsed() < self.ttl => {
                Some(cached.variations.clone())
            }
            Some(_) => {
                entries.pop(query);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query: &str, variations: Vec<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                query.to_string(),
                CachedVariations {
                    variations,
                    inserted_at: Instant::now(),
                },
            );
        }
    }
}

/// Normalize an LLM expansion response into exactly three queries, padding
/// with the original question when the model returned too few.
pub fn parse_variations(response: &str, original_query: &str) -> Vec<String> {
    let mut variations: Vec<String> = response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(VARIATION_COUNT)
        .map(ToString::to_string)
        .collect();

    while variations.len() < VARIATION_COUNT {
        variations.push(original_query.to_string());
    }

    variations
}

/// Round-1 variants, served from the cache when possible. An LLM failure
/// degrades to searching with the original question three times.
pub async fn cached_query_variations(
    cache: &QueryExpansionCache,
    llm: &dyn LlmClient,
    original_query: &str,
) -> (Vec<String>, bool) {
    if let Some(cached) = cache.get(original_query) {
        return (cached, true);
    }

    let variations =
        generate_variations(llm, QUERY_EXPANSION_PROMPT, original_query, None).await;
    cache.put(original_query, variations.clone());
    (variations, false)
}

/// One LLM expansion call with the given system prompt; `context` carries the
/// round-3 passage excerpt when present.
pub async fn generate_variations(
    llm: &dyn LlmClient,
    system_prompt: &str,
    original_query: &str,
    context: Option<&str>,
) -> Vec<String> {
    let user_message = match context {
        Some(excerpt) => format!(
            "Original question: {original_query}\n\nMost relevant passage so far:\n{excerpt}"
        ),
        None => format!("Original question: {original_query}"),
    };

    let messages = [
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_message),
    ];

    match llm.invoke(&messages).await {
        Ok(response) => parse_variations(&response, original_query),
        Err(err) => {
            warn!(error = %err, "query expansion failed, reusing the original query");
            vec![original_query.to_string(); VARIATION_COUNT]
        }
    }
}

/// Truncate a chunk text for the refinement prompt.
pub fn excerpt_for_refinement(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
