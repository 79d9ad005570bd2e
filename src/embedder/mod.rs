pub mod batch;
pub mod provider;
pub mod rate_limit;

pub use batch::BatchEmbedder;
pub use provider::{resolve_provider, EmbeddingProvider};
pub use rate_limit::RateLimiter;
