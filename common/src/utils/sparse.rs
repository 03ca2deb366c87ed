//! Self-contained TF-hash sparse encoder for the lexical half of hybrid
//! search. Deterministic: the same text always produces the same vector.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Token indices are hashed into this many buckets.
pub const SPARSE_VOCAB_SIZE: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[a-zA-ZäöüÄÖÜß]+").expect("token pattern is a valid regex")
    })
}

/// Lowercase, extract letter runs (umlauts included) and drop tokens of
/// length <= 2.
fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|token| token.as_str().to_string())
        .filter(|token| token.chars().count() > 2)
        .collect()
}

/// FNV-1a, used instead of the std hasher so indices stay stable across
/// processes and releases.
fn stable_hash(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Term-frequency sparse embedding: `(1 + ln c) / sqrt(total_tokens)` per
/// token, hashed into the vocabulary range. Hash collisions keep the maximum
/// score; output indices are sorted ascending.
pub fn embed_sparse(text: &str) -> SparseVector {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return SparseVector::default();
    }

    let total_tokens = tokens.len() as f32;
    let mut term_frequencies: HashMap<String, usize> = HashMap::new();
    for token in tokens {
        *term_frequencies.entry(token).or_insert(0) += 1;
    }

    let mut scores: HashMap<u32, f32> = HashMap::new();
    for (token, count) in term_frequencies {
        let index = (stable_hash(&token) % SPARSE_VOCAB_SIZE) as u32;
        let tf_score = 1.0 + (count as f32).ln();
        let score = tf_score / total_tokens.sqrt();

        scores
            .entry(index)
            .and_modify(|existing| {
                if score > *existing {
                    *existing = score;
                }
            })
            .or_insert(score);
    }

    let mut pairs: Vec<(u32, f32)> = scores.into_iter().collect();
    pairs.sort_by_key(|(index, _)| *index);

    SparseVector {
        indices: pairs.iter().map(|(index, _)| *index).collect(),
        values: pairs.iter().map(|(_, value)| *value).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_input_produce_empty_vectors() {
        assert!(embed_sparse("").is_empty());
        assert!(embed_sparse("   \n\t  ").is_empty());
        // Only short tokens, all dropped.
        assert!(embed_sparse("a ab of to 12 !!").is_empty());
    }

    #[test]
    fn indices_are_sorted_and_within_vocabulary() {
        let vector = embed_sparse("retrieval augmented generation with hybrid search");

        assert!(!vector.is_empty());
        assert_eq!(vector.indices.len(), vector.values.len());
        assert!(vector.indices.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(vector
            .indices
            .iter()
            .all(|index| u64::from(*index) < SPARSE_VOCAB_SIZE));
    }

    #[test]
    fn scores_follow_log_tf_over_sqrt_length() {
        // "wort" appears twice, "satz" once: 3 tokens in total.
        let vector = embed_sparse("wort wort satz");
        assert_eq!(vector.indices.len(), 2);

        let total = 3.0_f32;
        let expected_single = 1.0 / total.sqrt();
        let expected_double = (1.0 + 2.0_f32.ln()) / total.sqrt();

        let mut values = vector.values.clone();
        values.sort_by(|a, b| a.partial_cmp(b).expect("comparable scores"));
        assert!((values[0] - expected_single).abs() < 1e-6);
        assert!((values[1] - expected_double).abs() < 1e-6);
    }

    #[test]
    fn umlaut_tokens_are_preserved() {
        let vector = embed_sparse("Über Größenordnungen");
        assert_eq!(vector.indices.len(), 2);
    }

    #[test]
    fn encoding_is_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(embed_sparse(text), embed_sparse(text));
    }
}
