//! The `Chunk` type — the unit of indexing.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub sha: String,
    pub file: String,
    pub symbol: String,
    pub lang: String,
    pub chunk_type: String,
    pub embedding: Vec<f32>,
    pub embedding_provider: String,
    pub embedding_dimensions: usize,

    pub symbol_signature: Option<String>,
    pub symbol_parameters: Option<Vec<String>>,
    pub symbol_return: Option<String>,
    pub symbol_calls: Option<Vec<String>>,
    pub symbol_neighbors: Option<Vec<String>>,

    pub tags: Vec<String>,
    pub intent: Option<String>,
    pub description: Option<String>,
    pub docs: Option<String>,

    /// Count of variable-declaration nodes (`rule.variable_types`) within
    /// this chunk's byte range. 0 for fallback (non-AST) chunks.
    pub variable_count: usize,

    pub encrypted: bool,

    /// Chunk source text. Not persisted to the metadata DB — the DB stores
    /// only the embedding blob and metadata; the text lives in the chunk
    /// store, addressed by `sha`. Kept here transiently between chunking
    /// and store-write.
    #[serde(skip)]
    pub code: String,
}

impl Chunk {
    pub fn sha1_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `{file}:{symbol|kind}:{short_sha}`.
    pub fn make_id(file: &str, symbol_or_kind: &str, sha: &str) -> String {
        let short = &sha[..sha.len().min(8)];
        format!("{file}:{symbol_or_kind}:{short}")
    }
}

/// The §3 "BM25 Document" view: `symbol ∥ file ∥ description ∥ intent ∥
/// code_text`, newline-joined.
pub fn bm25_document_text(chunk: &Chunk) -> String {
    [
        chunk.symbol.as_str(),
        chunk.file.as_str(),
        chunk.description.as_deref().unwrap_or(""),
        chunk.intent.as_deref().unwrap_or(""),
        chunk.code.as_str(),
    ]
    .join("\n")
}

/// Subset of `Chunk` persisted in the codemap — everything except the
/// embedding vector and raw code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodemapEntry {
    pub file: String,
    pub symbol: String,
    pub sha: String,
    pub lang: String,
    #[serde(rename = "chunkType")]
    pub chunk_type: String,
    pub provider: String,
    pub dimensions: usize,
    #[serde(rename = "hasCodevaultTags")]
    pub has_codevault_tags: bool,
    #[serde(rename = "hasIntent")]
    pub has_intent: bool,
    #[serde(rename = "hasDocumentation")]
    pub has_documentation: bool,
    #[serde(rename = "variableCount")]
    pub variable_count: usize,
    pub encrypted: bool,
    pub symbol_signature: Option<String>,
    pub symbol_parameters: Option<Vec<String>>,
    pub symbol_return: Option<String>,
    pub symbol_calls: Option<Vec<String>>,
    pub symbol_neighbors: Option<Vec<String>>,
}

impl From<&Chunk> for CodemapEntry {
    fn from(c: &Chunk) -> Self {
        CodemapEntry {
            file: c.file.clone(),
            symbol: c.symbol.clone(),
            sha: c.sha.clone(),
            lang: c.lang.clone(),
            chunk_type: c.chunk_type.clone(),
            provider: c.embedding_provider.clone(),
            dimensions: c.embedding_dimensions,
            has_codevault_tags: !c.tags.is_empty(),
            has_intent: c.intent.is_some(),
            has_documentation: c.docs.is_some(),
            variable_count: c.variable_count,
            encrypted: c.encrypted,
            symbol_signature: c.symbol_signature.clone(),
            symbol_parameters: c.symbol_parameters.clone(),
            symbol_return: c.symbol_return.clone(),
            symbol_calls: c.symbol_calls.clone(),
            symbol_neighbors: c.symbol_neighbors.clone(),
        }
    }
}
