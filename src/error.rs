//! Core error taxonomy.
//!
//! One enum for every error kind that can cross a core boundary.
//! `CoreError::kind()` maps each variant to a stable lowercase identifier
//! so callers outside this crate (CLI, MCP boundary) can serialize the
//! kind without matching on Rust variant names.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("no metadata database found at {path}")]
    DatabaseNotFound { path: PathBuf },

    #[error("no chunks found for provider/dimensions pair")]
    NoChunksFound,

    #[error("no relevant matches for query")]
    NoRelevantMatches,

    #[error("encryption key required to read {sha}")]
    EncryptionKeyRequired { sha: String },

    #[error("encryption authentication failed for {sha}")]
    EncryptionAuthFailed { sha: String },

    #[error("encryption IV reuse detected for key_id {key_id}")]
    EncryptionIvReuse { key_id: String },

    #[error("failed to decompress chunk {sha}")]
    ChunkDecompressionFailed {
        sha: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read chunk {sha}")]
    ChunkReadFailed {
        sha: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("path validation failed: {path} escapes project root")]
    PathValidationFailed { path: PathBuf },

    #[error("rate limited: retry schedule exhausted after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error("batch embedding failed: {reason}")]
    BatchFailed { reason: String },

    #[error("indexing failed: {reason}")]
    IndexingError { reason: String },

    #[error("processing error for {path}: {reason}")]
    ProcessingError { path: PathBuf, reason: String },

    #[error("fallback chunking failed for {path}: {reason}")]
    FallbackError { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Lowercase, `snake_case` kind identifier used for stable wire serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    DatabaseNotFound,
    NoChunksFound,
    NoRelevantMatches,
    EncryptionKeyRequired,
    EncryptionAuthFailed,
    EncryptionIvReuse,
    ChunkDecompressionFailed,
    ChunkReadFailed,
    FileNotFound,
    PathValidationFailed,
    RateLimited,
    BatchFailed,
    IndexingError,
    ProcessingError,
    FallbackError,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::DatabaseNotFound => "database_not_found",
            ErrorKind::NoChunksFound => "no_chunks_found",
            ErrorKind::NoRelevantMatches => "no_relevant_matches",
            ErrorKind::EncryptionKeyRequired => "encryption_key_required",
            ErrorKind::EncryptionAuthFailed => "encryption_auth_failed",
            ErrorKind::EncryptionIvReuse => "encryption_iv_reuse",
            ErrorKind::ChunkDecompressionFailed => "chunk_decompression_failed",
            ErrorKind::ChunkReadFailed => "chunk_read_failed",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::PathValidationFailed => "path_validation_failed",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BatchFailed => "batch_failed",
            ErrorKind::IndexingError => "indexing_error",
            ErrorKind::ProcessingError => "processing_error",
            ErrorKind::FallbackError => "fallback_error",
            ErrorKind::Io => "io_error",
        }
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation { .. } => ErrorKind::ValidationError,
            CoreError::DatabaseNotFound { .. } => ErrorKind::DatabaseNotFound,
            CoreError::NoChunksFound => ErrorKind::NoChunksFound,
            CoreError::NoRelevantMatches => ErrorKind::NoRelevantMatches,
            CoreError::EncryptionKeyRequired { .. } => ErrorKind::EncryptionKeyRequired,
            CoreError::EncryptionAuthFailed { .. } => ErrorKind::EncryptionAuthFailed,
            CoreError::EncryptionIvReuse { .. } => ErrorKind::EncryptionIvReuse,
            CoreError::ChunkDecompressionFailed { .. } => ErrorKind::ChunkDecompressionFailed,
            CoreError::ChunkReadFailed { .. } => ErrorKind::ChunkReadFailed,
            CoreError::FileNotFound { .. } => ErrorKind::FileNotFound,
            CoreError::PathValidationFailed { .. } => ErrorKind::PathValidationFailed,
            CoreError::RateLimited { .. } => ErrorKind::RateLimited,
            CoreError::BatchFailed { .. } => ErrorKind::BatchFailed,
            CoreError::IndexingError { .. } => ErrorKind::IndexingError,
            CoreError::ProcessingError { .. } => ErrorKind::ProcessingError,
            CoreError::FallbackError { .. } => ErrorKind::FallbackError,
            CoreError::Io(_) | CoreError::Json(_) | CoreError::Db(_) => ErrorKind::Io,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation { message: message.into() }
    }
}

/// One error captured during a per-file or per-chunk boundary. Pushed onto
/// `IndexReport.errors` rather than propagated — the pass still returns `Ok`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexError {
    pub path: String,
    pub kind: &'static str,
    pub message: String,
}

impl IndexError {
    pub fn new(path: impl Into<String>, err: &CoreError) -> Self {
        Self {
            path: path.into(),
            kind: err.kind().as_str(),
            message: err.to_string(),
        }
    }
}
