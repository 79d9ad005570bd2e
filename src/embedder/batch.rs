//! Batch embedder: amortizes embedding-API calls without
//! sacrificing correctness on partial failure. A single-batch-at-a-time
//! invariant is enforced by a process-local mutex; file
//! workers calling `add_chunk` concurrently serialize only at that
//! boundary.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chunk::Chunk;
use crate::db::MetadataDb;
use crate::embedder::provider::{preprocess_for_embedding, EmbeddingProvider};
use crate::embedder::rate_limit::RateLimiter;
use crate::error::{CoreError, IndexError, Result};

pub const BATCH_SIZE: usize = 50;
pub const PER_BATCH_TOKEN_LIMIT: usize = 100_000;

struct QueueState {
    pending: Vec<Chunk>,
}

pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    rate_limiter: Arc<RateLimiter>,
    state: Mutex<QueueState>,
    batch_size: usize,
}

pub struct FlushOutcome {
    pub persisted: Vec<Chunk>,
    pub errors: Vec<IndexError>,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { provider, rate_limiter, state: Mutex::new(QueueState { pending: Vec::new() }), batch_size: BATCH_SIZE }
    }

    /// Enqueues `chunk`; if this brings the queue to `batch_size`, drains
    /// and embeds it before returning.
    pub async fn add_chunk(&self, chunk: Chunk, db: &MetadataDb) -> Result<Vec<IndexError>> {
        let should_flush = {
            let mut state = self.state.lock().await;
            state.pending.push(chunk);
            state.pending.len() >= self.batch_size
        };
        if should_flush {
            let outcome = self.drain_and_process(db).await?;
            return Ok(outcome.errors);
        }
        Ok(vec![])
    }

    pub async fn flush(&self, db: &MetadataDb) -> Result<FlushOutcome> {
        self.drain_and_process(db).await
    }

    async fn drain_and_process(&self, db: &MetadataDb) -> Result<FlushOutcome> {
        let batch = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return Ok(FlushOutcome { persisted: vec![], errors: vec![] });
        }
        self.process_batch(batch, db).await
    }

    /// Implements `process_batch`: one provider call for the
    /// whole batch; on batch-level failure, falls back to per-item
    /// embedding, recording per-item errors; the batch fails only if every
    /// item fails.
    async fn process_batch(&self, items: Vec<Chunk>, db: &MetadataDb) -> Result<FlushOutcome> {
        let max_tokens = self.provider.max_tokens_per_item();
        let max_chars = max_tokens * 4;

        let mut oversized = Vec::new();
        let mut fit: Vec<Chunk> = Vec::new();
        for item in items {
            if item.code.chars().count() > max_chars {
                oversized.push(item);
            } else {
                fit.push(item);
            }
        }

        let mut errors: Vec<IndexError> = oversized
            .iter()
            .map(|c| {
                let err = CoreError::BatchFailed { reason: format!("chunk {} exceeds per-item token limit", c.chunk_id) };
                IndexError::new(c.file.clone(), &err)
            })
            .collect();

        if fit.is_empty() {
            return Ok(FlushOutcome { persisted: vec![], errors });
        }

        let texts: Vec<String> = fit.iter().map(|c| preprocess_for_embedding(&c.code, max_chars)).collect();
        let approx_tokens: u32 = texts.iter().map(|t| (t.chars().count() / 4) as u32).sum::<u32>().min(PER_BATCH_TOKEN_LIMIT as u32);

        self.rate_limiter.acquire(approx_tokens).await?;

        let batch_result = self
            .rate_limiter
            .with_retry(|| {
                let provider = self.provider.clone();
                let texts = texts.clone();
                async move { provider.generate_embeddings(&texts).await }
            })
            .await;

        let persisted = match batch_result {
            Ok(vectors) if vectors.len() == fit.len() => {
                let mut persisted = Vec::with_capacity(fit.len());
                for (mut chunk, vector) in fit.into_iter().zip(vectors) {
                    chunk.embedding = vector;
                    chunk.embedding_provider = self.provider.get_name().to_string();
                    chunk.embedding_dimensions = self.provider.get_dimensions();
                    db.insert_chunk(&chunk)?;
                    persisted.push(chunk);
                }
                persisted
            }
            _ => {
                // Batch-level failure (or a malformed response): fall back
                // to per-item embedding.
                let mut persisted = Vec::new();
                for mut chunk in fit {
                    let text = preprocess_for_embedding(&chunk.code, max_chars);
                    let item_tokens = (text.chars().count() / 4) as u32;
                    self.rate_limiter.acquire(item_tokens).await?;
                    match self.provider.generate_embedding(&text).await {
                        Ok(vector) => {
                            chunk.embedding = vector;
                            chunk.embedding_provider = self.provider.get_name().to_string();
                            chunk.embedding_dimensions = self.provider.get_dimensions();
                            db.insert_chunk(&chunk)?;
                            persisted.push(chunk);
                        }
                        Err(e) => errors.push(IndexError::new(chunk.file.clone(), &e)),
                    }
                }
                persisted
            }
        };

        Ok(FlushOutcome { persisted, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::provider::MockProvider;

    fn chunk(id: &str, code: &str) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            sha: Chunk::sha1_hex(code.as_bytes()),
            file: "src/a.rs".into(),
            symbol: "foo".into(),
            lang: "rust".into(),
            chunk_type: "function_item".into(),
            embedding: vec![],
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
            code: code.into(),
        }
    }

    #[tokio::test]
    async fn flush_embeds_and_persists_pending_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(8));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);

        embedder.add_chunk(chunk("a", "fn a() {}"), &db).await.unwrap();
        embedder.add_chunk(chunk("b", "fn b() {}"), &db).await.unwrap();
        let outcome = embedder.flush(&db).await.unwrap();
        assert_eq!(outcome.persisted.len(), 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(db.get_chunks("mock", 8).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn oversized_item_is_a_hard_error_not_a_zero_vector() {
        let dir = tempfile::tempdir().unwrap();
        let db = MetadataDb::open(&dir.path().join("codevault.db")).unwrap();
        let provider = Arc::new(MockProvider::new(4));
        let limiter = Arc::new(RateLimiter::new(1000, 1_000_000, 1000));
        let embedder = BatchEmbedder::new(provider, limiter);

        let huge = "x".repeat(200_000);
        embedder.add_chunk(chunk("huge", &huge), &db).await.unwrap();
        let outcome = embedder.flush(&db).await.unwrap();
        assert!(outcome.persisted.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }
}
