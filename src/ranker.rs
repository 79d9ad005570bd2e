//! Hybrid ranker: scope filter → BM25 prefilter → dense
//! cosine scoring with additive boosts → optional RRF fusion → symbol-graph
//! boost → optional reranker hook. Builds on the same cosine-similarity and
//! boost-stacking approach used for single-pass dense search, generalized
//! into this multi-stage pipeline.

use std::collections::{HashMap, HashSet};

use crate::bm25::Bm25Index;
use crate::chunk::Chunk;
use crate::context_pack::ContextPack;
use crate::db::MetadataDb;
use crate::error::Result;

const INTENT_BOOST: f32 = 0.20;
const TAG_BOOST: f32 = 0.10;
const DOC_PATH_BOOST: f32 = 0.15;
const RRF_K: f32 = 60.0;
const SYMBOL_BOOST_OWN: f32 = 0.30;
const SYMBOL_BOOST_NEIGHBOR: f32 = 0.15;
const MIN_SYMBOL_TOKEN_LEN: usize = 3;

/// Path fragments (lowercased) that mark a chunk as documentation rather
/// than code, independent of the query text.
const DOC_PATH_MARKERS: [&str; 5] = ["readme", "/docs/", "changelog", "contributing", ".md"];

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub path_glob: Vec<String>,
    pub tags: Vec<String>,
    pub lang: Vec<String>,
    pub hybrid: bool,
    pub bm25: bool,
    pub symbol_boost: bool,
    pub bm25_prefilter_limit: usize,
}

impl SearchOptions {
    pub fn from_context_pack(pack: &ContextPack, bm25_prefilter_limit: usize) -> Self {
        Self {
            path_glob: pack.path_glob.clone(),
            tags: pack.tags.clone(),
            lang: pack.lang.clone(),
            hybrid: pack.hybrid,
            bm25: pack.bm25,
            symbol_boost: pack.symbol_boost,
            bm25_prefilter_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Final blended score, always within `[0, 1]`.
    pub score: f32,
    /// Pre-boost cosine similarity, preserved for callers that want to
    /// distinguish "matched well" from "boosted into relevance".
    pub score_raw: f32,
    /// Score after RRF fusion (or plain cosine if fusion didn't run) but
    /// before additive boosts — the tiebreaker used just ahead of
    /// `chunk_id` in the final sort.
    pub hybrid_score: f32,
    pub bm25_score: Option<f32>,
    pub bm25_rank: Option<usize>,
    pub vector_score: f32,
    pub vector_rank: usize,
    pub reranker_score: Option<f32>,
    pub reranker_rank: Option<usize>,
    pub symbol_boosted: bool,
    /// Chunk IDs whose symbol signature produced the symbol boost (the
    /// chunk's own ID, or a neighbor's).
    pub symbol_boost_sources: Vec<String>,
    pub intent: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HybridInfo {
    pub enabled: bool,
    pub bm25_enabled: bool,
    pub fused: bool,
    pub bm25_candidates: usize,
}

#[derive(Debug, Clone)]
pub struct SymbolBoostInfo {
    pub enabled: bool,
    pub boosted: usize,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub search_type: String,
    pub hybrid: HybridInfo,
    pub symbol_boost: SymbolBoostInfo,
    pub results: Vec<ScoredChunk>,
}

fn glob_match(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path.starts_with(prefix);
    }
    if pattern == "**" || pattern.is_empty() {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*") {
        return path.ends_with(suffix);
    }
    path == pattern || path.starts_with(pattern)
}

fn passes_scope(chunk: &Chunk, opts: &SearchOptions) -> bool {
    if !opts.path_glob.is_empty() && !opts.path_glob.iter().any(|g| glob_match(g, &chunk.file)) {
        return false;
    }
    if !opts.lang.is_empty() && !opts.lang.iter().any(|l| l.eq_ignore_ascii_case(&chunk.lang)) {
        return false;
    }
    if !opts.tags.is_empty() && !opts.tags.iter().any(|t| chunk.tags.iter().any(|ct| ct == t)) {
        return false;
    }
    true
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Reciprocal-rank-fusion score for a single rank position (1-based).
fn rrf_score(rank: usize) -> f32 {
    1.0 / (RRF_K + rank as f32)
}

pub struct Ranker<'a> {
    db: &'a MetadataDb,
    symbol_neighbors: &'a HashMap<String, Vec<String>>,
}

impl<'a> Ranker<'a> {
    pub fn new(db: &'a MetadataDb, symbol_neighbors: &'a HashMap<String, Vec<String>>) -> Self {
        Self { db, symbol_neighbors }
    }

    /// Runs the full hybrid ranking pipeline. `query_vector` is the caller's
    /// already-embedded query (embedding is outside this module's concern);
    /// `bm25` is the corpus's lazily-consolidated index for this
    /// `(provider, dimensions)` pair.
    pub fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        provider: &str,
        dimensions: usize,
        opts: &SearchOptions,
        bm25: &mut Bm25Index,
        limit: usize,
    ) -> Result<SearchResult> {
        let all_chunks = self.db.get_chunks(provider, dimensions)?;
        let in_scope: Vec<&Chunk> = all_chunks.iter().filter(|c| passes_scope(c, opts)).collect();
        if in_scope.is_empty() {
            return Ok(SearchResult {
                search_type: search_type_label(opts),
                hybrid: HybridInfo { enabled: opts.hybrid, bm25_enabled: opts.bm25, fused: false, bm25_candidates: 0 },
                symbol_boost: SymbolBoostInfo { enabled: opts.symbol_boost, boosted: 0 },
                results: vec![],
            });
        }
        let scope_ids: HashSet<String> = in_scope.iter().map(|c| c.chunk_id.clone()).collect();

        let prefilter_limit = opts.bm25_prefilter_limit.max(500);
        let bm25_ranked: Vec<(String, f32)> = if opts.bm25 {
            bm25.search(query_text, prefilter_limit, Some(&scope_ids))
        } else {
            vec![]
        };
        let bm25_score_by_id: HashMap<&str, f32> = bm25_ranked.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let bm25_rank: HashMap<&str, usize> =
            bm25_ranked.iter().take(prefilter_limit).enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();

        let candidates: Vec<&Chunk> = if opts.bm25 && !bm25_ranked.is_empty() {
            let allowed: HashSet<&str> = bm25_ranked.iter().map(|(id, _)| id.as_str()).collect();
            in_scope.into_iter().filter(|c| allowed.contains(c.chunk_id.as_str())).collect()
        } else {
            in_scope
        };

        let mut dense_scores: Vec<(&Chunk, f32)> =
            candidates.iter().map(|c| (*c, cosine_similarity(query_vector, &c.embedding))).collect();
        dense_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let dense_rank: HashMap<&str, usize> =
            dense_scores.iter().take(prefilter_limit).enumerate().map(|(i, (c, _))| (c.chunk_id.as_str(), i + 1)).collect();

        let signature_by_id: HashMap<&str, &str> =
            all_chunks.iter().filter_map(|c| c.symbol_signature.as_deref().map(|s| (c.chunk_id.as_str(), s))).collect();

        let fused = opts.hybrid && opts.bm25 && !bm25_ranked.is_empty();
        let bm25_candidates = bm25_ranked.len();

        let query_lower = query_text.to_lowercase();
        let query_tokens: Vec<&str> = query_lower.split_whitespace().filter(|w| w.len() >= MIN_SYMBOL_TOKEN_LEN).collect();

        let mut scored: Vec<ScoredChunk> = dense_scores
            .into_iter()
            .map(|(chunk, cosine)| {
                let score_raw = cosine;
                let vector_rank = dense_rank.get(chunk.chunk_id.as_str()).copied().unwrap_or(usize::MAX);
                let mut score = cosine;

                if opts.hybrid {
                    if let Some(&rank) = bm25_rank.get(chunk.chunk_id.as_str()) {
                        score = rrf_score(rank) + rrf_score(vector_rank);
                    }
                }
                let hybrid_score = score;

                if let Some(intent) = &chunk.intent {
                    if query_lower.contains(&intent.to_lowercase()) {
                        score += INTENT_BOOST;
                    }
                }

                let tag_matches = chunk.tags.iter().filter(|t| query_lower.contains(&t.to_lowercase())).count();
                if tag_matches > 0 {
                    score += TAG_BOOST * tag_matches as f32;
                }

                if DOC_PATH_MARKERS.iter().any(|m| chunk.file.to_lowercase().contains(m)) {
                    score += DOC_PATH_BOOST;
                }

                let mut symbol_boosted = false;
                let mut symbol_boost_sources = Vec::new();
                if opts.symbol_boost && !query_tokens.is_empty() {
                    if let Some(sig) = signature_by_id.get(chunk.chunk_id.as_str()) {
                        let sig_lower = sig.to_lowercase();
                        if query_tokens.iter().any(|t| sig_lower.contains(t)) {
                            score += SYMBOL_BOOST_OWN;
                            symbol_boosted = true;
                            symbol_boost_sources.push(chunk.chunk_id.clone());
                        }
                    }
                    if !symbol_boosted {
                        if let Some(neighbor_ids) = self.symbol_neighbors.get(&chunk.chunk_id) {
                            for nid in neighbor_ids {
                                let Some(sig) = signature_by_id.get(nid.as_str()) else { continue };
                                let sig_lower = sig.to_lowercase();
                                if query_tokens.iter().any(|t| sig_lower.contains(t)) {
                                    score += SYMBOL_BOOST_NEIGHBOR;
                                    symbol_boosted = true;
                                    symbol_boost_sources.push(nid.clone());
                                    break;
                                }
                            }
                        }
                    }
                }

                score = score.clamp(0.0, 1.0);
                ScoredChunk {
                    bm25_score: bm25_score_by_id.get(chunk.chunk_id.as_str()).copied(),
                    bm25_rank: bm25_rank.get(chunk.chunk_id.as_str()).copied(),
                    vector_score: cosine,
                    vector_rank,
                    reranker_score: None,
                    reranker_rank: None,
                    symbol_boosted,
                    symbol_boost_sources,
                    intent: chunk.intent.clone(),
                    description: chunk.description.clone(),
                    chunk: chunk.clone(),
                    score,
                    score_raw,
                    hybrid_score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.symbol_boosted.cmp(&a.symbol_boosted))
                .then_with(|| b.hybrid_score.partial_cmp(&a.hybrid_score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        let boosted = scored.iter().filter(|s| s.symbol_boosted).count();
        scored.truncate(limit);

        Ok(SearchResult {
            search_type: search_type_label(opts),
            hybrid: HybridInfo { enabled: opts.hybrid, bm25_enabled: opts.bm25, fused, bm25_candidates },
            symbol_boost: SymbolBoostInfo { enabled: opts.symbol_boost, boosted },
            results: scored,
        })
    }

    pub fn get_overview(&self, limit: usize) -> Result<Vec<Chunk>> {
        self.db.get_overview_chunks(limit)
    }

    pub fn get_chunk(&self, provider: &str, dimensions: usize, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.db.get_chunks(provider, dimensions)?.into_iter().find(|c| c.chunk_id == chunk_id))
    }
}

fn search_type_label(opts: &SearchOptions) -> String {
    if opts.hybrid && opts.bm25 {
        "hybrid".to_string()
    } else if opts.bm25 {
        "bm25_prefilter+vector".to_string()
    } else {
        "vector".to_string()
    }
}

/// Reranker hook: calls `rerank_fn` to reorder `candidates`; any error, or a
/// length mismatch in the returned set, is swallowed and the pre-rerank
/// order is kept (fail-open).
pub async fn apply_reranker<F, Fut>(candidates: Vec<ScoredChunk>, rerank_fn: F) -> Vec<ScoredChunk>
where
    F: FnOnce(Vec<ScoredChunk>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<ScoredChunk>>>,
{
    let fallback = candidates.clone();
    let fallback_len = candidates.len();
    match rerank_fn(candidates).await {
        Ok(reordered) if reordered.len() == fallback_len => reordered,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file: &str, embedding: Vec<f32>, tags: Vec<&str>) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            sha: "s".into(),
            file: file.into(),
            symbol: "foo".into(),
            lang: "rust".into(),
            chunk_type: "function_item".into(),
            embedding,
            embedding_provider: "mock".into(),
            embedding_dimensions: 3,
            symbol_signature: None,
            symbol_parameters: None,
            symbol_return: None,
            symbol_calls: None,
            symbol_neighbors: None,
            tags: tags.into_iter().map(String::from).collect(),
            intent: None,
            description: None,
            docs: None,
            variable_count: 0,
            encrypted: false,
            code: String::new(),
        }
    }

    #[test]
    fn cosine_similarity_is_one_for_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_is_zero_for_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn scope_filter_respects_path_glob() {
        let c = chunk("a", "src/auth/login.rs", vec![1.0, 0.0, 0.0], vec![]);
        let opts = SearchOptions { path_glob: vec!["src/auth/**".into()], ..Default::default() };
        assert!(passes_scope(&c, &opts));

        let opts2 = SearchOptions { path_glob: vec!["src/ui/**".into()], ..Default::default() };
        assert!(!passes_scope(&c, &opts2));
    }

    #[test]
    fn search_ranks_exact_match_above_orthogonal_vector() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        db.insert_chunk(&chunk("a", "src/a.rs", vec![1.0, 0.0, 0.0], vec![])).unwrap();
        db.insert_chunk(&chunk("b", "src/b.rs", vec![0.0, 1.0, 0.0], vec![])).unwrap();

        let neighbors = HashMap::new();
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions::default();
        let result = ranker.search("query", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        assert_eq!(result.results[0].chunk.chunk_id, "a");
    }

    #[test]
    fn intent_boost_fires_when_query_contains_the_intent_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let mut c = chunk("a", "src/a.rs", vec![1.0, 0.0, 0.0], vec![]);
        c.intent = Some("parse config".into());
        db.insert_chunk(&c).unwrap();

        let neighbors = HashMap::new();
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions::default();
        let result = ranker.search("how do I parse config files", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        assert!(result.results[0].score > result.results[0].score_raw);
    }

    #[test]
    fn tag_boost_is_multiplicative_per_matching_tag() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let one_tag = chunk("a", "src/a.rs", vec![1.0, 0.0, 0.0], vec!["auth"]);
        let two_tags = chunk("b", "src/b.rs", vec![1.0, 0.0, 0.0], vec!["auth", "login"]);
        db.insert_chunk(&one_tag).unwrap();
        db.insert_chunk(&two_tags).unwrap();

        let neighbors = HashMap::new();
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions::default();
        let result = ranker.search("auth login flow", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        let a = result.results.iter().find(|r| r.chunk.chunk_id == "a").unwrap();
        let b = result.results.iter().find(|r| r.chunk.chunk_id == "b").unwrap();
        assert!((b.score - b.score_raw) > (a.score - a.score_raw));
    }

    #[test]
    fn doc_path_boost_depends_on_file_path_not_query_text() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        db.insert_chunk(&chunk("a", "docs/guide.md", vec![1.0, 0.0, 0.0], vec![])).unwrap();
        db.insert_chunk(&chunk("b", "src/guide.rs", vec![1.0, 0.0, 0.0], vec![])).unwrap();

        let neighbors = HashMap::new();
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions::default();
        let result = ranker.search("totally unrelated query text", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        let a = result.results.iter().find(|r| r.chunk.chunk_id == "a").unwrap();
        let b = result.results.iter().find(|r| r.chunk.chunk_id == "b").unwrap();
        assert!(a.score > b.score);
    }

    #[test]
    fn symbol_boost_matches_query_token_against_own_signature() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let mut c = chunk("a", "src/a.rs", vec![1.0, 0.0, 0.0], vec![]);
        c.symbol_signature = Some("fn authenticate_user(token: &str) -> bool".into());
        db.insert_chunk(&c).unwrap();

        let neighbors = HashMap::new();
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions { symbol_boost: true, ..Default::default() };
        let result = ranker.search("authenticate", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        assert!(result.results[0].symbol_boosted);
        assert_eq!(result.results[0].symbol_boost_sources, vec!["a".to_string()]);
        assert_eq!(result.symbol_boost.boosted, 1);
    }

    #[test]
    fn symbol_boost_falls_back_to_a_neighbors_signature() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let mut caller = chunk("a", "src/a.rs", vec![1.0, 0.0, 0.0], vec![]);
        caller.symbol_signature = Some("fn handle_request()".into());
        let mut callee = chunk("b", "src/b.rs", vec![0.0, 1.0, 0.0], vec![]);
        callee.symbol_signature = Some("fn authenticate_user(token: &str) -> bool".into());
        db.insert_chunk(&caller).unwrap();
        db.insert_chunk(&callee).unwrap();

        let mut neighbors = HashMap::new();
        neighbors.insert("a".to_string(), vec!["b".to_string()]);
        let ranker = Ranker::new(&db, &neighbors);
        let mut bm25 = Bm25Index::new();
        let opts = SearchOptions { symbol_boost: true, ..Default::default() };
        let result = ranker.search("authenticate", &[1.0, 0.0, 0.0], "mock", 3, &opts, &mut bm25, 10).unwrap();
        let a = result.results.iter().find(|r| r.chunk.chunk_id == "a").unwrap();
        assert!(a.symbol_boosted);
        assert_eq!(a.symbol_boost_sources, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn apply_reranker_keeps_prior_order_on_failure() {
        let candidates = vec![
            ScoredChunk {
                chunk: chunk("a", "src/a.rs", vec![], vec![]),
                score: 0.9,
                score_raw: 0.9,
                hybrid_score: 0.9,
                bm25_score: None,
                bm25_rank: None,
                vector_score: 0.9,
                vector_rank: 1,
                reranker_score: None,
                reranker_rank: None,
                symbol_boosted: false,
                symbol_boost_sources: vec![],
                intent: None,
                description: None,
            },
            ScoredChunk {
                chunk: chunk("b", "src/b.rs", vec![], vec![]),
                score: 0.5,
                score_raw: 0.5,
                hybrid_score: 0.5,
                bm25_score: None,
                bm25_rank: None,
                vector_score: 0.5,
                vector_rank: 2,
                reranker_score: None,
                reranker_rank: None,
                symbol_boosted: false,
                symbol_boost_sources: vec![],
                intent: None,
                description: None,
            },
        ];
        let ids_before: Vec<String> = candidates.iter().map(|c| c.chunk.chunk_id.clone()).collect();
        let result = apply_reranker(candidates, |_| async { Err(crate::error::CoreError::IndexingError { reason: "boom".into() }) }).await;
        let ids_after: Vec<String> = result.iter().map(|c| c.chunk.chunk_id.clone()).collect();
        assert_eq!(ids_before, ids_after);
    }
}
