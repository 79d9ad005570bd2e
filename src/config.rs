use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Token/character budget for the chunker, derived from an embedding
/// model's declared limits. `overlap` is in the same unit as `min`/`max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelProfile {
    pub min: usize,
    pub optimal: usize,
    pub max: usize,
    pub overlap: usize,
    /// true if min/optimal/max/overlap are in tokens; false if characters.
    pub token_mode: bool,
}

impl Default for ModelProfile {
    fn default() -> Self {
        // Character-mode fallback: ~4 chars/token, optimal around 800 tokens.
        Self {
            min: 200,
            optimal: 3200,
            max: 8000,
            overlap: 200,
            token_mode: false,
        }
    }
}

/// Controls workspace scanning behavior (what to skip).
///
/// `.gitignore` is always respected by the scanner; these are additional
/// hard skips for noisy monorepo directories and files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere in the tree, compared against
    /// path components, not full paths.
    pub exclude_dir_names: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![
                ".git".into(),
                ".codevault".into(),
                "node_modules".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                ".next".into(),
                ".nuxt".into(),
                "coverage".into(),
                "vendor".into(),
            ],
            max_file_bytes: ABSOLUTE_MAX_FILE_BYTES,
        }
    }
}

/// Hard safety ceiling: files larger than this are always skipped.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptMode {
    Off,
    On,
}

impl Default for EncryptMode {
    fn default() -> Self {
        EncryptMode::Off
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub mode: EncryptMode,
    /// Raw 32-byte primary key, resolved from env — never persisted to disk.
    #[serde(skip)]
    pub primary_key: Option<[u8; 32]>,
    #[serde(skip)]
    pub deprecated_keys: Vec<[u8; 32]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rpm: u32,
    pub tpm: u32,
    pub queue_size: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rpm: 3000, tpm: 1_000_000, queue_size: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub model: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub dimensions: usize,
    pub max_tokens: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "auto".into(),
            model: "text-embedding-3-small".into(),
            api_key: None,
            base_url: None,
            dimensions: 1536,
            max_tokens: 8191,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub api_url: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_candidates: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { enabled: false, api_url: None, api_key: None, model: None, max_candidates: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub output_dir: PathBuf,
    pub scan: ScanConfig,
    pub model_profile: ModelProfile,
    pub encryption: EncryptionConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub reranker: RerankerConfig,
    pub indexing_concurrency: usize,
    pub max_bm25_cache: usize,
    pub max_chunk_cache: usize,
    pub bm25_prefilter_limit: usize,
    pub quiet: bool,
    pub log_level: String,
}

fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (cpus * 2).min(16)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".codevault"),
            scan: ScanConfig::default(),
            model_profile: ModelProfile::default(),
            encryption: EncryptionConfig::default(),
            provider: ProviderConfig::default(),
            rate_limit: RateLimitConfig::default(),
            reranker: RerankerConfig::default(),
            indexing_concurrency: default_concurrency(),
            max_bm25_cache: 10,
            max_chunk_cache: 500,
            bm25_prefilter_limit: 500,
            quiet: false,
            log_level: "info".into(),
        }
    }
}

/// Reads `repo_root/.codevault/config.json`, degrading to `Default` on any
/// read or parse error — file discovery itself stays out of scope here.
pub fn load_config(repo_root: &Path) -> EngineConfig {
    let primary = repo_root.join(".codevault").join("config.json");
    let Ok(text) = std::fs::read_to_string(&primary) else {
        return EngineConfig::default();
    };
    serde_json::from_str::<EngineConfig>(&text).unwrap_or_else(|_| EngineConfig::default())
}

impl EngineConfig {
    /// Overlays every recognized environment variable onto `base`.
    /// Env vars always win over file-loaded or default values.
    pub fn from_env(mut base: EngineConfig) -> EngineConfig {
        if let Some(key) = env::var("CODEVAULT_EMBEDDING_API_KEY").ok().or_else(|| env::var("OPENAI_API_KEY").ok()) {
            base.provider.api_key = Some(key);
        }
        if let Some(url) = env::var("CODEVAULT_EMBEDDING_BASE_URL").ok().or_else(|| env::var("OPENAI_BASE_URL").ok()) {
            base.provider.base_url = Some(url);
        }
        if let Ok(model) = env::var("CODEVAULT_EMBEDDING_MODEL") {
            base.provider.model = model;
        }
        if let Ok(n) = env::var("CODEVAULT_EMBEDDING_DIMENSIONS").ok().and_then(|s| s.parse().ok()) {
            base.provider.dimensions = n;
        }
        if let Ok(n) = env::var("CODEVAULT_EMBEDDING_MAX_TOKENS").ok().and_then(|s| s.parse().ok()) {
            base.provider.max_tokens = n;
        }
        if let Ok(n) = env::var("CODEVAULT_EMBEDDING_RATE_LIMIT_RPM").ok().and_then(|s| s.parse().ok()) {
            base.rate_limit.rpm = n;
        }
        if let Ok(n) = env::var("CODEVAULT_EMBEDDING_RATE_LIMIT_TPM").ok().and_then(|s| s.parse().ok()) {
            base.rate_limit.tpm = n;
        }
        if let Ok(key) = env::var("CODEVAULT_ENCRYPTION_KEY") {
            if let Some(bytes) = decode_key(&key) {
                base.encryption.primary_key = Some(bytes);
                base.encryption.mode = EncryptMode::On;
            }
        }
        if let Ok(deprecated) = env::var("CODEVAULT_ENCRYPTION_DEPRECATED_KEYS") {
            base.encryption.deprecated_keys =
                deprecated.split(',').filter_map(|s| decode_key(s.trim())).collect();
        }
        if let Ok(quiet) = env::var("CODEVAULT_QUIET") {
            base.quiet = quiet == "1" || quiet.eq_ignore_ascii_case("true");
        }
        if let Ok(level) = env::var("CODEVAULT_LOG_LEVEL") {
            base.log_level = level;
        }
        if let Ok(n) = env::var("CODEVAULT_INDEXING_CONCURRENCY").ok().and_then(|s| s.parse().ok()) {
            base.indexing_concurrency = n;
        }
        if let Ok(n) = env::var("CODEVAULT_MAX_BM25_CACHE").ok().and_then(|s| s.parse().ok()) {
            base.max_bm25_cache = n;
        }
        if let Ok(n) = env::var("CODEVAULT_MAX_CHUNK_CACHE").ok().and_then(|s| s.parse().ok()) {
            base.max_chunk_cache = n;
        }
        if let Ok(n) = env::var("CODEVAULT_BM25_PREFILTER_LIMIT").ok().and_then(|s| s.parse().ok()) {
            base.bm25_prefilter_limit = n;
        }
        if let Ok(n) = env::var("CODEVAULT_RERANKER_MAX").ok().and_then(|s| s.parse().ok()) {
            base.reranker.max_candidates = n;
        }
        if let Ok(url) = env::var("CODEVAULT_RERANK_API_URL") {
            base.reranker.api_url = Some(url);
            base.reranker.enabled = true;
        }
        if let Ok(key) = env::var("CODEVAULT_RERANK_API_KEY") {
            base.reranker.api_key = Some(key);
        }
        if let Ok(model) = env::var("CODEVAULT_RERANK_MODEL") {
            base.reranker.model = Some(model);
        }
        clamp_profile_to_provider(&mut base.model_profile, &base.provider);
        base
    }
}

/// Enforces the invariant that a model profile's `max` never exceeds the
/// embedding provider's declared `max_tokens`, pulling `optimal`/`min` down
/// with it so `min <= optimal <= max` stays intact.
fn clamp_profile_to_provider(profile: &mut ModelProfile, provider: &ProviderConfig) {
    if profile.max > provider.max_tokens {
        profile.max = provider.max_tokens;
        profile.optimal = profile.optimal.min(profile.max);
        profile.min = profile.min.min(profile.optimal);
    }
}

/// Decodes a key given as 32-byte base64 or hex.
fn decode_key(raw: &str) -> Option<[u8; 32]> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .ok()
        .or_else(|| hex::decode(raw).ok())?;
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_char_mode() {
        let p = ModelProfile::default();
        assert!(!p.token_mode);
        assert!(p.min < p.optimal && p.optimal < p.max);
    }

    #[test]
    fn env_overlay_overrides_model() {
        env::set_var("CODEVAULT_EMBEDDING_MODEL", "test-model-xyz");
        let cfg = EngineConfig::from_env(EngineConfig::default());
        assert_eq!(cfg.provider.model, "test-model-xyz");
        env::remove_var("CODEVAULT_EMBEDDING_MODEL");
    }

    #[test]
    fn from_env_clamps_profile_max_to_provider_max_tokens() {
        let mut base = EngineConfig::default();
        base.model_profile = ModelProfile { min: 500, optimal: 4000, max: 20_000, overlap: 200, token_mode: true };
        base.provider.max_tokens = 8191;
        let cfg = EngineConfig::from_env(base);
        assert_eq!(cfg.model_profile.max, 8191);
        assert!(cfg.model_profile.optimal <= cfg.model_profile.max);
        assert!(cfg.model_profile.min <= cfg.model_profile.optimal);
    }

    #[test]
    fn decode_key_rejects_wrong_length() {
        assert!(decode_key("short").is_none());
    }

    #[test]
    fn decode_key_accepts_hex_and_base64() {
        let raw = [7u8; 32];
        let hexed = hex::encode(raw);
        assert_eq!(decode_key(&hexed), Some(raw));
    }
}
