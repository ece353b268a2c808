use crawlkit_core::PluginError;

/// Error kinds the core distinguishes (spec §7).
///
/// Only `Store`, `Config` and an explicitly-listed `Pipeline`/`Cancellation`
/// kind abort the whole crawl; everything else is recorded per-reference as
/// a terminal [`crawlkit_core::State`] instead of surfaced here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Durable store I/O failure — always fatal (spec §7: `StoreError`).
    #[error("store error: {0}")]
    Store(String),

    /// A pipeline error whose kind matched `stopOnExceptions`, re-raised
    /// after `finalize` so the worker stops the pool (spec §7: `PipelineError`).
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PluginError),

    /// Cooperative stop or external interrupt, wrapped as fatal so the pool
    /// drains cleanly (spec §7: `Cancellation`).
    #[error("cancelled: {0}")]
    Cancellation(String),

    /// Missing/invalid configuration, fatal at `prepare_execution` (spec §7:
    /// `ConfigError`).
    #[error("config error: {0}")]
    Config(String),
}
