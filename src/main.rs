use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;

use codevault::cache;
use codevault::chunk::bm25_document_text;
use codevault::cli::{Cli, Command};
use codevault::codemap::Codemap;
use codevault::config::{self, EngineConfig};
use codevault::db::MetadataDb;
use codevault::embedder::provider::resolve_provider;
use codevault::error::CoreError;
use codevault::indexer::{self, IndexMode, Paths};
use codevault::logging;
use codevault::ranker::{Ranker, SearchOptions};
use codevault::store::{ChunkStore, KeySet};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "codevault failed");
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Index { path } => run_index_command(&path, cli.quiet).await,
        Command::Search { query, path, limit, path_glob, tags, lang, no_hybrid, no_bm25, no_symbol_boost, json } => {
            run_search_command(&path, &query, limit, path_glob, tags, lang, !no_hybrid, !no_bm25, !no_symbol_boost, json, cli.quiet).await
        }
        Command::GetChunk { chunk_id, path } => run_get_chunk_command(&path, &chunk_id, cli.quiet).await,
    }
}

fn load_engine_config(project_root: &Path, quiet: bool) -> EngineConfig {
    let mut cfg = EngineConfig::from_env(config::load_config(project_root));
    if quiet {
        cfg.quiet = true;
    }
    cfg
}

async fn run_index_command(path: &std::path::Path, quiet: bool) -> Result<()> {
    let project_root = path.canonicalize().with_context(|| format!("resolving {}", path.display()))?;
    let config = load_engine_config(&project_root, quiet);
    logging::init(&config);

    let provider = resolve_provider(&config.provider);
    tracing::info!(provider = provider.get_name(), "starting full index pass");

    let report = indexer::run_index(&project_root, &config, provider, IndexMode::Full)
        .await
        .map_err(anyhow::Error::from)?;

    cache::clear_bm25_cache();

    println!(
        "{}",
        json!({
            "success": report.success,
            "processedChunks": report.processed_chunks,
            "totalChunks": report.total_chunks,
            "provider": report.provider,
            "errors": report.errors.iter().map(|e| json!({"path": e.path, "kind": e.kind, "message": e.message})).collect::<Vec<_>>(),
            "chunkingStats": {
                "mergedSmall": report.chunking_stats.merged_small,
                "skippedSmall": report.chunking_stats.skipped_small,
            },
        })
    );

    if !report.success {
        bail!("index pass completed with {} error(s)", report.errors.len());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_search_command(
    path: &std::path::Path,
    query: &str,
    limit: usize,
    path_glob: Vec<String>,
    tags: Vec<String>,
    lang: Vec<String>,
    hybrid: bool,
    bm25: bool,
    symbol_boost: bool,
    as_json: bool,
    quiet: bool,
) -> Result<()> {
    let project_root = path.canonicalize().with_context(|| format!("resolving {}", path.display()))?;
    let config = load_engine_config(&project_root, quiet);
    logging::init(&config);

    let paths = Paths::new(&project_root, &config.output_dir);
    if !paths.db_path().exists() {
        bail!("no index found at {} — run `codevault index` first", paths.output_dir.display());
    }

    let provider = resolve_provider(&config.provider);
    let db = MetadataDb::open(&paths.db_path()).map_err(anyhow::Error::from)?;
    let codemap = Codemap::load(&paths.codemap_path());
    let store = ChunkStore::new(
        paths.chunk_dir(),
        KeySet { primary: config.encryption.primary_key, deprecated: config.encryption.deprecated_keys.clone() },
    );

    let dimensions = provider.get_dimensions();
    let chunks = db.get_chunks(provider.get_name(), dimensions).map_err(anyhow::Error::from)?;

    let mut warnings: Vec<String> = Vec::new();
    let bm25_key = (project_root.to_string_lossy().to_string(), provider.get_name().to_string(), dimensions);
    {
        let cache_lock = cache::bm25_cache(config.max_bm25_cache);
        let mut guard = cache_lock.lock().expect("bm25 cache mutex poisoned");
        let index = guard.get_or_create(bm25_key);
        let mut docs = Vec::with_capacity(chunks.len());
        for c in &chunks {
            let mut with_code = c.clone();
            match store.read(&c.sha) {
                Ok(code) => with_code.code = code,
                Err(CoreError::EncryptionKeyRequired { .. }) => {
                    warnings.push(format!("encryption_key_required: chunk {} could not be decrypted for BM25 indexing", c.chunk_id));
                }
                Err(e) => {
                    warnings.push(format!("chunk_read_failed: {} ({e})", c.chunk_id));
                }
            }
            docs.push((with_code.chunk_id.clone(), bm25_document_text(&with_code)));
        }
        index.add_documents(&docs);
    }

    let symbol_neighbors: HashMap<String, Vec<String>> = codemap
        .all()
        .filter_map(|(id, entry)| entry.symbol_neighbors.clone().map(|ns| (id.clone(), ns)))
        .collect();

    let query_vector = provider.generate_embedding(query).await.map_err(anyhow::Error::from)?;

    let opts = SearchOptions { path_glob, tags, lang, hybrid, bm25, symbol_boost, bm25_prefilter_limit: config.bm25_prefilter_limit };
    let ranker = Ranker::new(&db, &symbol_neighbors);
    let results = {
        let cache_lock = cache::bm25_cache(config.max_bm25_cache);
        let mut guard = cache_lock.lock().expect("bm25 cache mutex poisoned");
        let index = guard.get_or_create((project_root.to_string_lossy().to_string(), provider.get_name().to_string(), dimensions));
        ranker.search(query, &query_vector, provider.get_name(), dimensions, &opts, index, limit).map_err(anyhow::Error::from)?
    };

    if as_json {
        let envelope = json!({
            "success": true,
            "warnings": warnings,
            "searchType": results.search_type,
            "hybrid": {
                "enabled": results.hybrid.enabled,
                "bm25Enabled": results.hybrid.bm25_enabled,
                "fused": results.hybrid.fused,
                "bm25Candidates": results.hybrid.bm25_candidates,
            },
            "symbolBoost": {
                "enabled": results.symbol_boost.enabled,
                "boosted": results.symbol_boost.boosted,
            },
            "results": results.results.iter().map(|r| json!({
                "chunkId": r.chunk.chunk_id,
                "file": r.chunk.file,
                "symbol": r.chunk.symbol,
                "score": r.score,
                "scoreRaw": r.score_raw,
                "bm25Score": r.bm25_score,
                "bm25Rank": r.bm25_rank,
                "vectorScore": r.vector_score,
                "vectorRank": r.vector_rank,
                "rerankerScore": r.reranker_score,
                "rerankerRank": r.reranker_rank,
                "symbolBoostSources": r.symbol_boost_sources,
                "intent": r.intent,
                "description": r.description,
            })).collect::<Vec<_>>(),
        });
        println!("{envelope}");
    } else {
        for (i, r) in results.results.iter().enumerate() {
            println!("{:>2}. {:.4}  {}  ({})", i + 1, r.score, r.chunk.file, r.chunk.symbol);
        }
        for w in &warnings {
            eprintln!("warning: {w}");
        }
    }

    Ok(())
}

async fn run_get_chunk_command(path: &std::path::Path, chunk_id: &str, quiet: bool) -> Result<()> {
    let project_root = path.canonicalize().with_context(|| format!("resolving {}", path.display()))?;
    let config = load_engine_config(&project_root, quiet);
    logging::init(&config);

    let paths = Paths::new(&project_root, &config.output_dir);
    let provider = resolve_provider(&config.provider);
    let db = MetadataDb::open(&paths.db_path()).map_err(anyhow::Error::from)?;
    let symbol_neighbors = HashMap::new();
    let ranker = Ranker::new(&db, &symbol_neighbors);

    let chunk = ranker
        .get_chunk(provider.get_name(), provider.get_dimensions(), chunk_id)
        .map_err(anyhow::Error::from)?;

    let Some(chunk) = chunk else {
        println!("{}", json!({"success": false, "error": "chunk not found"}));
        return Ok(());
    };

    let store = ChunkStore::new(
        paths.chunk_dir(),
        KeySet { primary: config.encryption.primary_key, deprecated: config.encryption.deprecated_keys.clone() },
    );

    match store.read(&chunk.sha) {
        Ok(code) => {
            println!("{}", json!({"success": true, "chunkId": chunk.chunk_id, "file": chunk.file, "code": code}));
            Ok(())
        }
        Err(e) => {
            println!("{}", json!({"success": false, "chunkId": chunk.chunk_id, "error": e.kind().as_str()}));
            Ok(())
        }
    }
}
