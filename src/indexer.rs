//! Indexing engine: orchestrates a full or partial pass over
//! the workspace, wiring scanner → file processor → batch embedder →
//! symbol graph, then persists the manifest/codemap and reports a summary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunker::ChunkingStats;
use crate::codemap::Codemap;
use crate::config::EngineConfig;
use crate::db::MetadataDb;
use crate::embedder::{BatchEmbedder, EmbeddingProvider};
use crate::error::{CoreError, IndexError, Result};
use crate::manifest::Manifest;
use crate::scanner::{self, ScanOptions};
use crate::store::ChunkStore;
use crate::symbol_graph;

pub enum IndexMode {
    /// Scans the whole workspace and reconciles deletions (also runs the
    /// blob-GC sweep).
    Full,
    /// Restricts the pass to `changed`, as driven by the change-queue
    /// watcher, and reconciles `deleted` directly rather than diffing
    /// against the whole manifest. No blob-GC sweep runs on a partial pass.
    Partial { changed: Vec<PathBuf>, deleted: Vec<PathBuf> },
}

#[derive(Debug, Default)]
pub struct ChunkingStatsSummary {
    pub merged_small: usize,
    pub skipped_small: usize,
}

#[derive(Debug, Default)]
pub struct TokenStats {
    pub estimated_tokens_embedded: usize,
}

pub struct IndexReport {
    pub success: bool,
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub provider: String,
    pub errors: Vec<IndexError>,
    pub chunking_stats: ChunkingStatsSummary,
    pub token_stats: Option<TokenStats>,
}

pub struct Paths {
    pub output_dir: PathBuf,
}

impl Paths {
    pub fn new(project_root: &Path, output_dir: &Path) -> Self {
        let output_dir = if output_dir.is_absolute() { output_dir.to_path_buf() } else { project_root.join(output_dir) };
        Self { output_dir }
    }
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("merkle.json")
    }
    pub fn codemap_path(&self) -> PathBuf {
        self.output_dir.join("codemap.json")
    }
    pub fn chunk_dir(&self) -> PathBuf {
        self.output_dir.join("chunks")
    }
    pub fn db_path(&self) -> PathBuf {
        self.output_dir.join("codevault.db")
    }
}

fn scan_options(project_root: &Path, config: &EngineConfig, target: PathBuf) -> ScanOptions {
    ScanOptions {
        repo_root: project_root.to_path_buf(),
        target,
        max_file_bytes: config.scan.max_file_bytes,
        exclude_dir_names: config.scan.exclude_dir_names.clone(),
    }
}

/// Deletes any blob under `chunk_dir` whose sha is no longer referenced by
/// `codemap`. Best-effort, not a
/// correctness requirement, so IO errors here are swallowed.
fn gc_orphan_blobs(chunk_dir: &Path, codemap: &Codemap) {
    let live: HashSet<String> = codemap.shas();
    let Ok(read_dir) = std::fs::read_dir(chunk_dir) else { return };
    for entry in read_dir.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let sha = name.strip_suffix(".gz.enc").or_else(|| name.strip_suffix(".gz"));
        if let Some(sha) = sha {
            if !live.contains(sha) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

pub async fn run_index(
    project_root: &Path,
    config: &EngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    mode: IndexMode,
) -> Result<IndexReport> {
    let paths = Paths::new(project_root, &config.output_dir);
    std::fs::create_dir_all(&paths.output_dir)?;

    let mut manifest = Manifest::load(&paths.manifest_path());
    let mut codemap = Codemap::load(&paths.codemap_path());
    let db = MetadataDb::open(&paths.db_path())?;
    let store = ChunkStore::new(
        paths.chunk_dir(),
        crate::store::KeySet { primary: config.encryption.primary_key, deprecated: config.encryption.deprecated_keys.clone() },
    );
    let encrypt = config.encryption.mode == crate::config::EncryptMode::On;

    let rate_limiter = Arc::new(crate::embedder::RateLimiter::new(config.rate_limit.rpm, config.rate_limit.tpm, config.rate_limit.queue_size));
    let embedder = BatchEmbedder::new(provider.clone(), rate_limiter);

    let target = project_root.to_path_buf();
    let scan_opts = scan_options(project_root, config, target);
    let mut entries = scanner::scan_source_files(&scan_opts)
        .map_err(|e| CoreError::IndexingError { reason: e.to_string() })?;

    if let IndexMode::Partial { changed, .. } = &mode {
        let wanted: HashSet<&Path> = changed.iter().map(|p| p.as_path()).collect();
        entries.retain(|e| wanted.contains(e.rel_path.as_path()));
    }

    let mut errors = Vec::new();
    let mut processed_chunks = 0usize;
    let mut stats = ChunkingStatsSummary::default();

    match &mode {
        IndexMode::Full => {
            let current: HashSet<String> = entries.iter().map(|e| e.rel_path.to_string_lossy().replace('\\', "/")).collect();
            let stale_files: Vec<String> = manifest.paths().filter(|p| !current.contains(p.as_str())).cloned().collect();
            for file in stale_files {
                if let Err(e) = crate::file_processor::process_deletion(&file, &db, &mut manifest, &mut codemap) {
                    errors.push(IndexError::new(file, &e));
                }
            }
        }
        IndexMode::Partial { deleted, .. } => {
            for path in deleted {
                let file = path.to_string_lossy().replace('\\', "/");
                if let Err(e) = crate::file_processor::process_deletion(&file, &db, &mut manifest, &mut codemap) {
                    errors.push(IndexError::new(file, &e));
                }
            }
        }
    }

    let prepared = crate::file_processor::prepare_files(&entries, &config.model_profile, &manifest, config.indexing_concurrency);

    for (entry, prepared_file) in entries.iter().zip(prepared) {
        match crate::file_processor::apply_prepared(entry, prepared_file, &store, &db, &embedder, &mut manifest, &mut codemap, encrypt).await {
            Ok(outcome) => {
                processed_chunks += outcome.chunks_written;
                if let Some(s) = outcome.stats {
                    accumulate(&mut stats, &s);
                }
                errors.extend(outcome.errors);
            }
            Err(e) => errors.push(IndexError::new(entry.rel_path.to_string_lossy().to_string(), &e)),
        }
    }

    let flush_outcome = embedder.flush(&db).await?;
    processed_chunks += flush_outcome.persisted.len();
    errors.extend(flush_outcome.errors);

    let neighbors = symbol_graph::build_symbol_neighbors(&codemap);
    for (id, ns) in &neighbors {
        if let Some(entry) = codemap_entry_mut(&mut codemap, id) {
            entry.symbol_neighbors = Some(ns.clone());
        }
    }

    if matches!(mode, IndexMode::Full) {
        gc_orphan_blobs(&paths.chunk_dir(), &codemap);
    }

    manifest.save(&paths.manifest_path())?;
    codemap.save(&paths.codemap_path())?;

    let total_chunks = codemap.len();
    Ok(IndexReport {
        success: true,
        processed_chunks,
        total_chunks,
        provider: provider.get_name().to_string(),
        errors,
        chunking_stats: stats,
        token_stats: None,
    })
}

fn codemap_entry_mut<'a>(codemap: &'a mut Codemap, id: &str) -> Option<&'a mut crate::chunk::CodemapEntry> {
    codemap.get_mut(id)
}

fn accumulate(summary: &mut ChunkingStatsSummary, stats: &ChunkingStats) {
    summary.merged_small += stats.merged_small;
    summary.skipped_small += stats.skipped_small;
}
