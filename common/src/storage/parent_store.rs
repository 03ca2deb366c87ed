//! On-disk side-store for parent chunks: one JSON file per document holding
//! the ordered parent array, addressable by index.

use std::path::Path;

use crate::error::AppError;

/// Persist the parent array, creating the directory if needed.
pub fn store_parents(path: &Path, parents: &[String]) -> Result<(), AppError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let serialized = serde_json::to_vec(parents)?;
    std::fs::write(path, serialized)?;

    Ok(())
}

pub fn load_parents(path: &Path) -> Result<Vec<String>, AppError> {
    let bytes = std::fs::read(path)?;
    let parents: Vec<String> = serde_json::from_slice(&bytes)?;
    Ok(parents)
}

/// Load one parent by index. Out-of-range or negative indices resolve to
/// `None` rather than an error, matching how retrieval treats stale payloads.
pub fn load_parent(path: &Path, index: i64) -> Result<Option<String>, AppError> {
    if index < 0 {
        return Ok(None);
    }

    let parents = load_parents(path)?;
    Ok(parents.get(index as usize).cloned())
}

pub fn parent_count(path: &Path) -> Result<usize, AppError> {
    Ok(load_parents(path)?.len())
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_by_index() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc_1.json");

        let parents = vec![
            "first parent".to_string(),
            "second parent".to_string(),
            "third parent".to_string(),
        ];
        store_parents(&path, &parents).expect("store");

        assert!(exists(&path));
        assert_eq!(parent_count(&path).expect("count"), 3);
        assert_eq!(
            load_parent(&path, 1).expect("load"),
            Some("second parent".to_string())
        );
    }

    #[test]
    fn out_of_range_and_negative_indices_are_none() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("doc_2.json");
        store_parents(&path, &["only".to_string()]).expect("store");

        assert_eq!(load_parent(&path, 5).expect("load"), None);
        assert_eq!(load_parent(&path, -1).expect("load"), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("never_written.json");

        assert!(!exists(&path));
        assert!(load_parent(&path, 0).is_err());
    }
}
