//! Logging setup: a single `tracing-subscriber` init point, driven by
//! `EngineConfig.log_level`/`EngineConfig.quiet`. `main.rs` calls this once,
//! before anything else runs.

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Initializes the global tracing subscriber. Safe to call more than once in
/// a process (e.g. across tests in the same binary) — a second call is a
/// no-op rather than a panic.
pub fn init(config: &EngineConfig) {
    let filter = if config.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
