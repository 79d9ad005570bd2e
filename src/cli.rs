//! Argument surface for the `codevault` binary. Kept intentionally thin —
//! `main.rs` does the actual wiring via its own `clap::Parser` derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "codevault")]
#[command(version)]
#[command(about = "Local semantic code-search engine")]
pub struct Cli {
    /// Suppress all but error-level log output.
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse, chunk, and embed a workspace, persisting chunks/codemap/DB.
    Index {
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,
    },
    /// Run a hybrid (dense + BM25 + symbol-boost) search against an
    /// already-indexed workspace.
    Search {
        query: String,

        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long = "path-glob", value_name = "GLOB")]
        path_glob: Vec<String>,

        #[arg(long, value_name = "TAG")]
        tags: Vec<String>,

        #[arg(long, value_name = "LANG")]
        lang: Vec<String>,

        #[arg(long)]
        no_hybrid: bool,

        #[arg(long)]
        no_bm25: bool,

        #[arg(long)]
        no_symbol_boost: bool,

        /// Emit the result envelope as JSON instead of a human-readable list.
        #[arg(long)]
        json: bool,
    },
    /// Fetch a single chunk's decrypted source by id.
    GetChunk {
        chunk_id: String,

        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,
    },
}
