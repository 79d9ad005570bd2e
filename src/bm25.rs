//! Hand-rolled incremental BM25 index. Hand-rolled rather
//! than a vector-DB/search-engine crate, keeping with this codebase's own
//! philosophy of hand-rolling cosine/symbol-sniper scoring instead of
//! reaching for an external index.

use std::collections::HashMap;

use regex::Regex;
use std::sync::OnceLock;

pub const K1: f32 = 1.2;
pub const B: f32 = 0.75;
const MIN_DOCS_FOR_CONSOLIDATION: usize = 3;

fn tokenizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap())
}

pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    tokenizer().split(&lower).filter(|t| !t.is_empty()).map(|t| t.to_string()).collect()
}

#[derive(Default, Clone)]
struct Posting {
    /// term frequency per document id.
    term_freq: HashMap<String, u32>,
}

pub struct Bm25Index {
    /// doc_id -> token -> count
    postings: HashMap<String, HashMap<String, u32>>,
    doc_lengths: HashMap<String, usize>,
    idf: HashMap<String, f32>,
    avg_doc_len: f32,
    dirty: bool,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self { postings: HashMap::new(), doc_lengths: HashMap::new(), idf: HashMap::new(), avg_doc_len: 0.0, dirty: true }
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extends the posting lists with `docs` (id, text) and marks the
    /// index dirty; IDF consolidation happens lazily in `search`.
    pub fn add_documents(&mut self, docs: &[(String, String)]) {
        for (id, text) in docs {
            let tokens = tokenize(text);
            self.doc_lengths.insert(id.clone(), tokens.len());
            let mut counts: HashMap<String, u32> = HashMap::new();
            for t in tokens {
                *counts.entry(t).or_insert(0) += 1;
            }
            self.postings.insert(id.clone(), counts);
        }
        self.dirty = true;
    }

    pub fn remove_document(&mut self, id: &str) {
        self.postings.remove(id);
        self.doc_lengths.remove(id);
        self.dirty = true;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.postings.contains_key(id)
    }

    pub fn doc_count(&self) -> usize {
        self.postings.len()
    }

    fn consolidate(&mut self) {
        if !self.dirty {
            return;
        }
        if self.postings.len() < MIN_DOCS_FOR_CONSOLIDATION {
            // No-op below the minimum document count.
            self.dirty = false;
            return;
        }
        let n = self.postings.len() as f32;
        let total_len: usize = self.doc_lengths.values().sum();
        self.avg_doc_len = if self.postings.is_empty() { 0.0 } else { total_len as f32 / n };

        let mut doc_freq: HashMap<&str, u32> = HashMap::new();
        for counts in self.postings.values() {
            for term in counts.keys() {
                *doc_freq.entry(term.as_str()).or_insert(0) += 1;
            }
        }
        self.idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let idf = ((n - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln();
                (term.to_string(), idf)
            })
            .collect();
        self.dirty = false;
    }

    /// Scores all documents against `query`, returning the top `k` by
    /// descending BM25 score, restricted to `scope` if provided.
    pub fn search(&mut self, query: &str, k: usize, scope: Option<&std::collections::HashSet<String>>) -> Vec<(String, f32)> {
        self.consolidate();
        if self.idf.is_empty() {
            return vec![];
        }
        let query_terms = tokenize(query);
        let mut scores: Vec<(String, f32)> = Vec::new();

        for (doc_id, counts) in &self.postings {
            if let Some(scope) = scope {
                if !scope.contains(doc_id) {
                    continue;
                }
            }
            let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
            let mut score = 0.0f32;
            for term in &query_terms {
                let Some(&tf) = counts.get(term) else { continue };
                let Some(&idf) = self.idf.get(term) else { continue };
                let tf = tf as f32;
                let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len.max(1.0));
                score += idf * (tf * (K1 + 1.0)) / denom;
            }
            if score > 0.0 {
                scores.push((doc_id.clone(), score));
            }
        }
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(k);
        scores
    }
}

/// LRU cache of up to `capacity` indices keyed by `(basePath, providerName,
/// dimensions)`. Backed by the `lru` crate, the same
/// one used for the BM25-LRU singleton.
pub struct Bm25Cache {
    inner: lru::LruCache<(String, String, usize), Bm25Index>,
}

impl Bm25Cache {
    pub fn new(capacity: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: lru::LruCache::new(cap) }
    }

    pub fn get_or_create(&mut self, key: (String, String, usize)) -> &mut Bm25Index {
        if !self.inner.contains(&key) {
            self.inner.put(key.clone(), Bm25Index::new());
        }
        self.inner.get_mut(&key).expect("just inserted")
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_non_alphanumeric_unicode() {
        let toks = tokenize("Hello, World! café-bar");
        assert_eq!(toks, vec!["hello", "world", "café", "bar"]);
    }

    #[test]
    fn consolidation_is_noop_under_three_docs() {
        let mut idx = Bm25Index::new();
        idx.add_documents(&[("a".into(), "hello world".into()), ("b".into(), "hello there".into())]);
        let results = idx.search("hello", 10, None);
        assert!(results.is_empty());
    }

    #[test]
    fn scores_documents_containing_query_terms_higher() {
        let mut idx = Bm25Index::new();
        idx.add_documents(&[
            ("a".into(), "fn authenticate_user returns token".into()),
            ("b".into(), "fn render_widget paints screen".into()),
            ("c".into(), "fn authenticate_admin checks token".into()),
        ]);
        let results = idx.search("authenticate token", 10, None);
        assert!(!results.is_empty());
        assert!(results[0].0 == "a" || results[0].0 == "c");
    }

    #[test]
    fn scope_restricts_candidate_set() {
        let mut idx = Bm25Index::new();
        idx.add_documents(&[
            ("a".into(), "alpha beta".into()),
            ("b".into(), "alpha gamma".into()),
            ("c".into(), "alpha delta".into()),
        ]);
        let scope: std::collections::HashSet<String> = ["b".to_string()].into_iter().collect();
        let results = idx.search("alpha", 10, Some(&scope));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "b");
    }

    #[test]
    fn lru_cache_evicts_oldest_beyond_capacity() {
        let mut cache = Bm25Cache::new(2);
        cache.get_or_create(("p1".into(), "mock".into(), 8));
        cache.get_or_create(("p2".into(), "mock".into(), 8));
        cache.get_or_create(("p3".into(), "mock".into(), 8));
        assert_eq!(cache.len(), 2);
    }
}
