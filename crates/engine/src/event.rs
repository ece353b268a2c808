use crawlkit_core::{CrawlRecord, Reference};

/// Tagged event broadcast to all listeners (spec §4.6, §9 Design Note: a
/// thread-safe fan-out of tagged variants, no global state).
///
/// Mirrors the teacher's `EngineEvent` broadcast shape
/// (`crates/client-engine/src/api.rs`): the engine never prints anything
/// itself, it only publishes events; a driver (e.g. `crawlkit-cli`) is the
/// one that renders them.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CrawlerStarted,
    CrawlerResumed,
    CrawlerStopping,
    CrawlerStopped,
    CrawlerFinished,
    DocumentImported { record: CrawlRecord },
    RejectedImport { record: CrawlRecord },
    RejectedError { record: CrawlRecord, message: String },
    DocumentCommittedRemove { reference: Reference },
    /// Advisory progress sample, logged by the pool at most every
    /// `progress_log_interval` (spec §4.4).
    Progress { processed: u64, queued: u64 },
    Warning { message: String },
}
