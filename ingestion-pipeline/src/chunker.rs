//! Parent/child segmentation. Parents are coarse character windows over the
//! full text, children are finer windows over each parent; a metadata chunk,
//! when present, takes parent index 0 and shifts every content parent by one.

use common::{utils::config::AppConfig, vector::DocumentChunk};

pub const BODY_SECTION: &str = "Body";
pub const METADATA_SECTION: &str = "Document Metadata";

#[derive(Debug, Clone)]
pub struct ChunkingParams {
    pub parent_chunk_size: usize,
    pub parent_chunk_overlap: usize,
    pub child_chunk_size: usize,
    pub child_chunk_overlap: usize,
}

impl From<&AppConfig> for ChunkingParams {
    fn from(config: &AppConfig) -> Self {
        Self {
            parent_chunk_size: config.parent_chunk_size,
            parent_chunk_overlap: config.parent_chunk_overlap,
            child_chunk_size: config.child_chunk_size,
            child_chunk_overlap: config.child_chunk_overlap,
        }
    }
}

/// Slide a character window of `size` with stride `size - overlap` over the
/// text, dropping windows that are only whitespace.
pub fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }

    let stride = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            windows.push(window);
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    windows
}

/// Split a document into its parent array and child chunks.
///
/// Returns `(parents, children)`: the parent array is persisted to the
/// side-store as-is, so every child's `parent_id` is a valid index into it.
pub fn chunk_document(
    text: &str,
    metadata_chunk: Option<&str>,
    params: &ChunkingParams,
) -> (Vec<String>, Vec<DocumentChunk>) {
    let content_parents = split_windows(
        text,
        params.parent_chunk_size,
        params.parent_chunk_overlap,
    );

    let parent_offset: i64 = if metadata_chunk.is_some() { 1 } else { 0 };

    let mut parents = Vec::with_capacity(content_parents.len() + 1);
    if let Some(metadata) = metadata_chunk {
        parents.push(metadata.to_string());
    }
    parents.extend(content_parents.iter().cloned());

    let mut children = Vec::new();
    for (parent_index, parent_text) in content_parents.iter().enumerate() {
        for window in split_windows(
            parent_text,
            params.child_chunk_size,
            params.child_chunk_overlap,
        ) {
            children.push(DocumentChunk {
                text: window,
                parent_id: parent_index as i64 + parent_offset,
                section: BODY_SECTION.to_string(),
                position: "middle".to_string(),
                is_metadata: false,
            });
        }
    }

    if let Some(metadata) = metadata_chunk {
        children.push(DocumentChunk {
            text: metadata.to_string(),
            parent_id: 0,
            section: METADATA_SECTION.to_string(),
            position: "metadata".to_string(),
            is_metadata: true,
        });
    }

    (parents, children)
}
