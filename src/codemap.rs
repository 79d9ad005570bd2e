//! Codemap: a stable JSON index of chunk metadata (no
//! embeddings), keyed by `chunk_id`, used by ranking and display.

use std::collections::HashMap;
use std::path::Path;

use crate::chunk::{Chunk, CodemapEntry};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct Codemap {
    entries: HashMap<String, CodemapEntry>,
}

impl Codemap {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .map(|entries| Codemap { entries })
            .unwrap_or_default()
    }

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

    pub fn insert_from_chunk(&mut self, chunk: &Chunk) {
        self.entries.insert(chunk.chunk_id.clone(), CodemapEntry::from(chunk));
    }

    pub fn remove(&mut self, chunk_id: &str) -> Option<CodemapEntry> {
        self.entries.remove(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&CodemapEntry> {
        self.entries.get(chunk_id)
    }

    pub fn get_mut(&mut self, chunk_id: &str) -> Option<&mut CodemapEntry> {
        self.entries.get_mut(chunk_id)
    }

    pub fn entries_for_file<'a>(&'a self, file: &'a str) -> impl Iterator<Item = (&'a String, &'a CodemapEntry)> {
        self.entries.iter().filter(move |(_, e)| e.file == file)
    }

    pub fn ids_for_file(&self, file: &str) -> Vec<String> {
        self.entries_for_file(file).map(|(id, _)| id.clone()).collect()
    }

    pub fn shas(&self) -> std::collections::HashSet<String> {
        self.entries.values().map(|e| e.sha.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &CodemapEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> std::collections::HashSet<String> {
        self.entries.values().map(|e| e.file.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> Chunk {
        Chunk {
            chunk_id: "src/a.rs:foo:abc".into(),
            sha: "abc".into(),
            file: "src/a.rs".into(),
            symbol: "foo".into(),
            lang: "rust".into(),
            chunk_type: "function_item".into(),
            embedding: vec![],
            embedding_provider: "mock".into(),
            embedding_dimensions: 0,
            symbol_signature: None,
            symbol_parameters: None,
            symbol_return: None,
            symbol_calls: None,
            symbol_neighbors: None,
            tags: vec![],
            intent: None,
            description: None,
            docs: None,
            variable_count: 0,
            encrypted: false,
            code: String::new(),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codemap.json");
        let mut map = Codemap::default();
        map.insert_from_chunk(&sample_chunk());
        map.save(&path).unwrap();

        let loaded = Codemap::load(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("src/a.rs:foo:abc").is_some());
    }

    #[test]
    fn ids_for_file_filters_correctly() {
        let mut map = Codemap::default();
        map.insert_from_chunk(&sample_chunk());
        assert_eq!(map.ids_for_file("src/a.rs"), vec!["src/a.rs:foo:abc".to_string()]);
        assert!(map.ids_for_file("src/other.rs").is_empty());
    }
}
