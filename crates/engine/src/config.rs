use std::path::PathBuf;
use std::time::Duration;

use crawlkit_core::ErrorKind;

/// Orphan reconciliation strategy (spec §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphansStrategy {
    /// Do nothing with stale cache entries.
    Ignore,
    /// Re-enqueue stale entries (through the queue-pipeline filter) and
    /// reprocess them.
    Process,
    /// Re-enqueue stale entries raw and route them through the delete path.
    Delete,
}

/// Recognized engine configuration (spec §6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Crawler identity. Must be non-blank.
    pub id: String,
    /// Per-crawler workspace root; `work_dir/downloads/<id>` is the
    /// download area swept for empty directories at shutdown (spec §4.6).
    pub work_dir: PathBuf,
    /// Number of concurrent workers.
    pub num_threads: usize,
    /// Maximum PROCESSED rows across NORMAL + ORPHAN_REPROCESS combined.
    /// `None` disables the cap (spec: `-1` in the source configuration).
    pub max_documents: Option<u64>,
    /// Orphan reconciliation strategy.
    pub orphans_strategy: OrphansStrategy,
    /// Error kinds that abort the whole crawl instead of only the
    /// reference that raised them (spec §4.3 step 5, §7).
    pub stop_on_exceptions: Vec<ErrorKind>,
    /// Whether to resume from a prior run's durable store.
    pub resume: bool,
    /// How often the store autosaves a snapshot (spec §4.1 expansion).
    pub checkpoint_interval: Duration,
    /// Minimum idle back-off between empty `nextQueued` polls (spec §4.4).
    pub idle_backoff: Duration,
    /// Minimum interval between advisory progress events (spec §4.4: "logged
    /// at most every 5 seconds").
    pub progress_log_interval: Duration,
}

impl EngineConfig {
    pub const DEFAULT_NUM_THREADS: usize = 1;
    pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(1);
    pub const DEFAULT_PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            work_dir: work_dir.into(),
            num_threads: Self::DEFAULT_NUM_THREADS,
            max_documents: None,
            orphans_strategy: OrphansStrategy::Ignore,
            stop_on_exceptions: Vec::new(),
            resume: false,
            checkpoint_interval: Self::DEFAULT_CHECKPOINT_INTERVAL,
            idle_backoff: Self::DEFAULT_IDLE_BACKOFF,
            progress_log_interval: Self::DEFAULT_PROGRESS_LOG_INTERVAL,
        }
    }

    /// The download area this crawler id owns under `work_dir`.
    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join("downloads").join(&self.id)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::EngineError> {
        if self.id.trim().is_empty() {
            return Err(crate::error::EngineError::Config("id must not be blank".into()));
        }
        if self.num_threads == 0 {
            return Err(crate::error::EngineError::Config("num_threads must be >= 1".into()));
        }
        Ok(())
    }
}
