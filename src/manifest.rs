//! Merkle-like file manifest: a flat `{relative_path:
//! {shaFile, chunkShas[]}}` map persisted as JSON under
//! `.codevault/merkle.json`, driving incremental re-indexing decisions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    #[serde(rename = "shaFile")]
    pub sha_file: String,
    #[serde(rename = "chunkShas")]
    pub chunk_shas: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(flatten)]
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Atomic write: temp file + rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, rel_path: &str) -> Option<&ManifestEntry> {
        self.entries.get(rel_path)
    }

    pub fn insert(&mut self, rel_path: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(rel_path.into(), entry);
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<ManifestEntry> {
        self.entries.remove(rel_path)
    }

    pub fn unchanged(&self, rel_path: &str, file_hash: &str) -> bool {
        self.entries.get(rel_path).map(|e| e.sha_file == file_hash).unwrap_or(false)
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `fileHash = xxh64(source)` hex-stringified.
pub fn file_hash(source_utf8: &str) -> String {
    format!("{:016x}", xxh64(source_utf8.as_bytes(), 0))
}

/// Rejects any candidate path resolving outside `root` via `..` or a
/// symlink escape.
pub fn validate_path(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { root.join(candidate) };

    let root_canon = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    // Resolve lexically first to catch `..` even when the path doesn't
    // exist yet (e.g. a not-yet-written chunk blob path).
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                if !normalized.pop() {
                    return Err(CoreError::PathValidationFailed { path: candidate.to_path_buf() });
                }
            }
            std::path::Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if !normalized.starts_with(&root_canon) && !normalized.starts_with(root) {
        return Err(CoreError::PathValidationFailed { path: candidate.to_path_buf() });
    }

    if let Ok(canon) = normalized.canonicalize() {
        let root_for_check = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        if !canon.starts_with(&root_for_check) {
            return Err(CoreError::PathValidationFailed { path: candidate.to_path_buf() });
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_hash_is_deterministic() {
        assert_eq!(file_hash("hello"), file_hash("hello"));
        assert_ne!(file_hash("hello"), file_hash("world"));
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merkle.json");
        let mut m = Manifest::default();
        m.insert("src/a.rs", ManifestEntry { sha_file: "abc".into(), chunk_shas: vec!["sha1".into()] });
        m.save(&path).unwrap();

        let loaded = Manifest::load(&path);
        assert!(loaded.unchanged("src/a.rs", "abc"));
        assert!(!loaded.unchanged("src/a.rs", "def"));
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path(dir.path(), Path::new("../../etc/passwd"));
        assert!(err.is_err());
    }

    #[test]
    fn accepts_path_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let ok = validate_path(dir.path(), Path::new("src/a.rs"));
        assert!(ok.is_ok());
    }
}
