//! Embedding provider capability set: a small trait plus a
//! string-keyed registry, not an inheritance chain. Grounded on
//! `forge-indexer/src/embedder.rs`'s `async_trait Embedder` trait and its
//! `OpenAIEmbedder` HTTP implementation.

use async_trait::async_trait;

use crate::error::{CoreError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate_embeddings(&[text.to_string()]).await?.into_iter().next().unwrap_or_default())
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn get_name(&self) -> &str;
    fn get_model(&self) -> &str;
    fn get_dimensions(&self) -> usize;
    fn max_tokens_per_item(&self) -> usize {
        8191
    }
}

/// Deterministic embedder for tests and offline use: hashes the input
/// text into a fixed-length vector so identical text always yields an
/// identical vector, and distinct text (almost always) yields a distinct
/// one — enough to drive ranking tests without a real API.
pub struct MockProvider {
    dimensions: usize,
    model: String,
}

impl MockProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, model: "mock-embedding".into() }
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| deterministic_vector(t, self.dimensions)).collect())
    }

    fn get_name(&self) -> &str {
        "mock"
    }

    fn get_model(&self) -> &str {
        &self.model
    }

    fn get_dimensions(&self) -> usize {
        self.dimensions
    }
}

fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};
    let mut out = Vec::with_capacity(dimensions);
    let mut counter: u32 = 0;
    while out.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks_exact(4) {
            if out.len() >= dimensions {
                break;
            }
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            out.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        counter += 1;
    }
    out
}

/// Strips excess whitespace and truncates to the provider's per-item
/// character budget (a proxy for its token budget when no real tokenizer
/// is wired in), the way `forge-indexer`'s `preprocess_code_for_embedding`
/// prepares text before sending it to OpenAI.
pub fn preprocess_for_embedding(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_chars {
        collapsed.chars().take(max_chars).collect()
    } else {
        collapsed
    }
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model,
            dimensions,
        }
    }
}

#[derive(serde::Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingsRequest { model: &self.model, input: texts };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::BatchFailed { reason: e.to_string() })?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::RateLimited { attempts: 0 });
        }
        if !resp.status().is_success() {
            return Err(CoreError::BatchFailed { reason: format!("provider returned {}", resp.status()) });
        }

        let parsed: EmbeddingsResponse = resp.json().await.map_err(|e| CoreError::BatchFailed { reason: e.to_string() })?;
        if parsed.data.len() != texts.len() {
            return Err(CoreError::BatchFailed { reason: "response length mismatch".into() });
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn get_name(&self) -> &str {
        "openai"
    }

    fn get_model(&self) -> &str {
        &self.model
    }

    fn get_dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Resolves a provider by string selector: `"auto"` falls back to
/// `"mock"` when no API key is configured. A string-keyed registry rather
/// than a match on an enum of concrete types.
pub fn resolve_provider(cfg: &crate::config::ProviderConfig) -> std::sync::Arc<dyn EmbeddingProvider> {
    match cfg.name.as_str() {
        "mock" => std::sync::Arc::new(MockProvider::new(cfg.dimensions)),
        "openai" => {
            if let Some(key) = &cfg.api_key {
                std::sync::Arc::new(OpenAiProvider::new(key.clone(), cfg.base_url.clone(), cfg.model.clone(), cfg.dimensions))
            } else {
                std::sync::Arc::new(MockProvider::new(cfg.dimensions))
            }
        }
        _ => {
            if let Some(key) = &cfg.api_key {
                std::sync::Arc::new(OpenAiProvider::new(key.clone(), cfg.base_url.clone(), cfg.model.clone(), cfg.dimensions))
            } else {
                std::sync::Arc::new(MockProvider::new(cfg.dimensions))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = MockProvider::new(8);
        let a = provider.generate_embedding("hello world").await.unwrap();
        let b = provider.generate_embedding("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn mock_provider_distinguishes_different_text() {
        let provider = MockProvider::new(8);
        let a = provider.generate_embedding("alpha").await.unwrap();
        let b = provider.generate_embedding("beta").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn preprocess_truncates_to_budget() {
        let text = "a".repeat(100);
        let out = preprocess_for_embedding(&text, 10);
        assert_eq!(out.chars().count(), 10);
    }
}
