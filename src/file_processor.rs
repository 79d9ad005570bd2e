//! Per-file indexing pipeline, split into a parallelizable `prepare` stage
//! (read, hash-skip check, parse + chunk — no shared mutable state) and a
//! sequential `apply` stage (blob write, DB/codemap/manifest mutation,
//! embed-queue push) that needs ordered access to the manifest and codemap.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::chunk::Chunk;
use crate::chunker::{self, ChunkingStats};
use crate::codemap::Codemap;
use crate::config::ModelProfile;
use crate::db::MetadataDb;
use crate::embedder::BatchEmbedder;
use crate::error::{CoreError, IndexError, Result};
use crate::manifest::{self, Manifest, ManifestEntry};
use crate::parser;
use crate::rules::{self, LanguageRule};
use crate::scanner::FileEntry;
use crate::store::ChunkStore;

pub struct ProcessOutcome {
    pub skipped_unchanged: bool,
    pub chunks_written: usize,
    pub stats: Option<ChunkingStats>,
    pub errors: Vec<IndexError>,
    /// Chunk IDs that existed for this file before this pass but are gone
    /// now — already removed from `db`/`codemap`, passed back so the
    /// caller's symbol-graph rebuild sees a consistent picture.
    pub removed_chunk_ids: Vec<String>,
}

fn fallback_chunk(rel_path: &str, source: &str, lang_hint: &str) -> Chunk {
    let sha = Chunk::sha1_hex(source.as_bytes());
    let chunk_id = Chunk::make_id(rel_path, "fallback", &sha);
    let symbol = Path::new(rel_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_path.to_string());
    Chunk {
        chunk_id,
        sha,
        file: rel_path.to_string(),
        symbol,
        lang: lang_hint.to_string(),
        chunk_type: "file".to_string(),
        embedding: Vec::new(),
        embedding_provider: String::new(),
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
        code: source.to_string(),
    }
}

fn chunk_with_rule(rel_path: &str, source: &str, rule: &LanguageRule, profile: &crate::config::ModelProfile) -> (Vec<Chunk>, Option<ChunkingStats>) {
    match parser::parse(rule, source) {
        Some(tree) => {
            let result = chunker::chunk_file(rel_path, source, rule, &tree, profile);
            (result.chunks, Some(result.stats))
        }
        None => (vec![fallback_chunk(rel_path, source, rule.name)], None),
    }
}

/// Result of the `prepare` stage for one file: everything computable
/// without touching the manifest/codemap/DB, so it can run off the main
/// thread.
pub enum PreparedFile {
    ReadError(CoreError),
    Unchanged,
    Chunked { chunks: Vec<Chunk>, stats: Option<ChunkingStats>, file_hash: String },
}

/// Reads, hash-checks, and chunks a single file. Pure given `manifest` (read
/// only) — safe to call from any thread.
fn prepare_one(entry: &FileEntry, profile: &ModelProfile, manifest: &Manifest) -> PreparedFile {
    let rel_path = entry.rel_path.to_string_lossy().replace('\\', "/");

    let source = match std::fs::read_to_string(&entry.abs_path) {
        Ok(s) => s,
        Err(e) => return PreparedFile::ReadError(CoreError::ProcessingError { path: entry.abs_path.clone(), reason: e.to_string() }),
    };

    let file_hash = manifest::file_hash(&source);
    if manifest.unchanged(&rel_path, &file_hash) {
        return PreparedFile::Unchanged;
    }

    let rule = rules::registry().for_path(Path::new(&rel_path));
    let (chunks, stats) = match rule {
        Some(rule) => chunk_with_rule(&rel_path, &source, rule, profile),
        None => (vec![fallback_chunk(&rel_path, &source, "unknown")], None),
    };
    PreparedFile::Chunked { chunks, stats, file_hash }
}

/// Runs the prepare stage over `entries` bounded by `concurrency` worker
/// threads (a pool sized 1 falls back to effectively sequential execution).
/// Order of the returned vector matches `entries`.
pub fn prepare_files(entries: &[FileEntry], profile: &ModelProfile, manifest: &Manifest, concurrency: usize) -> Vec<PreparedFile> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(concurrency.max(1)).build();
    match pool {
        Ok(pool) => pool.install(|| entries.par_iter().map(|e| prepare_one(e, profile, manifest)).collect()),
        Err(_) => entries.iter().map(|e| prepare_one(e, profile, manifest)).collect(),
    }
}

/// Applies a file's `prepare` result: writes chunk blobs, pushes embeddings,
/// and mutates the manifest/codemap/DB. Sequential — callers run this one
/// file at a time in scan order.
#[allow(clippy::too_many_arguments)]
pub async fn apply_prepared(
    entry: &FileEntry,
    prepared: PreparedFile,
    store: &ChunkStore,
    db: &MetadataDb,
    embedder: &BatchEmbedder,
    manifest: &mut Manifest,
    codemap: &mut Codemap,
    encrypt: bool,
) -> Result<ProcessOutcome> {
    let rel_path = entry.rel_path.to_string_lossy().replace('\\', "/");

    let (mut chunks, stats, file_hash) = match prepared {
        PreparedFile::ReadError(e) => {
            return Ok(ProcessOutcome {
                skipped_unchanged: false,
                chunks_written: 0,
                stats: None,
                errors: vec![IndexError::new(rel_path, &e)],
                removed_chunk_ids: vec![],
            });
        }
        PreparedFile::Unchanged => {
            return Ok(ProcessOutcome { skipped_unchanged: true, chunks_written: 0, stats: None, errors: vec![], removed_chunk_ids: vec![] });
        }
        PreparedFile::Chunked { chunks, stats, file_hash } => (chunks, stats, file_hash),
    };

    let previous_chunk_ids = codemap.ids_for_file(&rel_path);

    let mut errors = Vec::new();
    let mut new_chunk_ids = Vec::with_capacity(chunks.len());
    let mut chunk_shas = Vec::with_capacity(chunks.len());

    for chunk in chunks.iter_mut() {
        match store.write(&chunk.code, encrypt) {
            Ok(sha) => {
                chunk.encrypted = encrypt;
                chunk_shas.push(sha);
            }
            Err(e) => {
                errors.push(IndexError::new(rel_path.clone(), &e));
                continue;
            }
        }
        new_chunk_ids.push(chunk.chunk_id.clone());
        codemap.insert_from_chunk(chunk);

        match embedder.add_chunk(chunk.clone(), db).await {
            Ok(mut batch_errors) => errors.append(&mut batch_errors),
            Err(e) => errors.push(IndexError::new(rel_path.clone(), &e)),
        }
    }

    let stale: Vec<String> = previous_chunk_ids.into_iter().filter(|id| !new_chunk_ids.contains(id)).collect();
    if !stale.is_empty() {
        db.delete_chunks(&stale)?;
        for id in &stale {
            codemap.remove(id);
        }
    }

    manifest.insert(rel_path, ManifestEntry { sha_file: file_hash, chunk_shas });

    Ok(ProcessOutcome {
        skipped_unchanged: false,
        chunks_written: new_chunk_ids.len(),
        stats,
        errors,
        removed_chunk_ids: stale,
    })
}

/// Processes a single scanned file against the current manifest/codemap,
/// writing chunk blobs, queuing embeddings, and updating both in place.
/// Equivalent to `prepare_one` immediately followed by `apply_prepared` —
/// kept for single-file callers that have no concurrency to bound.
#[allow(clippy::too_many_arguments)]
pub async fn process_file(
    entry: &FileEntry,
    profile: &ModelProfile,
    store: &ChunkStore,
    db: &MetadataDb,
    embedder: &BatchEmbedder,
    manifest: &mut Manifest,
    codemap: &mut Codemap,
    encrypt: bool,
) -> Result<ProcessOutcome> {
    let prepared = prepare_one(entry, profile, manifest);
    apply_prepared(entry, prepared, store, db, embedder, manifest, codemap, encrypt).await
}

/// Handles a file removed from the workspace: deletes its chunks from the
/// db/codemap and drops its manifest entry. Blob GC happens separately at
/// full-pass finalize.
pub fn process_deletion(rel_path: &str, db: &MetadataDb, manifest: &mut Manifest, codemap: &mut Codemap) -> Result<Vec<String>> {
    let ids = codemap.ids_for_file(rel_path);
    if !ids.is_empty() {
        db.delete_chunks(&ids)?;
        for id in &ids {
            codemap.remove(id);
        }
    }
    db.delete_by_file_path(rel_path)?;
    manifest.remove(rel_path);
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelProfile;
    use crate::embedder::provider::MockProvider;
    use crate::embedder::rate_limit::RateLimiter;
    use crate::store::KeySet;
    use std::path::PathBuf;

    fn profile() -> ModelProfile {
        ModelProfile { min: 1, optimal: 200, max: 400, overlap: 10, token_mode: false }
    }

    #[tokio::test]
    async fn first_pass_chunks_and_writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn hello() { 1 }\n").unwrap();

        let store = ChunkStore::new(dir.path().join("chunks"), KeySet::default());
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);
        let mut manifest = Manifest::default();
        let mut codemap = Codemap::default();

        let entry = FileEntry { abs_path: dir.path().join("a.rs"), rel_path: PathBuf::from("a.rs"), bytes: 10 };
        let outcome = process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false)
            .await
            .unwrap();

        assert!(!outcome.skipped_unchanged);
        assert_eq!(outcome.chunks_written, 1);
        assert!(manifest.get("a.rs").is_some());
        assert_eq!(codemap.ids_for_file("a.rs").len(), 1);
    }

    #[tokio::test]
    async fn second_pass_skips_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn hello() { 1 }\n").unwrap();

        let store = ChunkStore::new(dir.path().join("chunks"), KeySet::default());
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);
        let mut manifest = Manifest::default();
        let mut codemap = Codemap::default();
        let entry = FileEntry { abs_path: dir.path().join("a.rs"), rel_path: PathBuf::from("a.rs"), bytes: 10 };

        process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false).await.unwrap();
        let second = process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false).await.unwrap();
        assert!(second.skipped_unchanged);
    }

    #[tokio::test]
    async fn unrecognized_extension_falls_back_to_a_whole_file_chunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.xyz"), "just some plain text\n").unwrap();

        let store = ChunkStore::new(dir.path().join("chunks"), KeySet::default());
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);
        let mut manifest = Manifest::default();
        let mut codemap = Codemap::default();

        let entry = FileEntry { abs_path: dir.path().join("notes.xyz"), rel_path: PathBuf::from("notes.xyz"), bytes: 10 };
        let outcome = process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false)
            .await
            .unwrap();

        assert_eq!(outcome.chunks_written, 1);
        let ids = codemap.ids_for_file("notes.xyz");
        assert_eq!(ids.len(), 1);
        let entry = codemap.get(&ids[0]).unwrap();
        assert_eq!(entry.symbol, "notes.xyz");
        assert_eq!(entry.chunk_type, "file");
    }

    #[tokio::test]
    async fn edited_file_replaces_stale_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "fn one() { 1 }\n").unwrap();

        let store = ChunkStore::new(dir.path().join("chunks"), KeySet::default());
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);
        let mut manifest = Manifest::default();
        let mut codemap = Codemap::default();
        let entry = FileEntry { abs_path: path.clone(), rel_path: PathBuf::from("a.rs"), bytes: 10 };

        process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false).await.unwrap();
        let first_ids = codemap.ids_for_file("a.rs");

        std::fs::write(&path, "fn two_totally_different_body() { 2 + 2 }\n").unwrap();
        process_file(&entry, &profile(), &store, &db, &embedder, &mut manifest, &mut codemap, false).await.unwrap();
        let second_ids = codemap.ids_for_file("a.rs");

        assert_ne!(first_ids, second_ids);
    }
}
