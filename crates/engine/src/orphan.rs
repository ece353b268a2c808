use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::broadcast;

use crawlkit_core::{CrawlRecord, CrawlerPlugin};

use crate::config::OrphansStrategy;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::pool::WorkerPool;
use crate::processor::{ProcessingMode, ReferenceProcessor};
use crate::store::CrawlDataStore;

/// Runs the configured orphan reconciliation pass after the main pool drains
/// (spec §4.5, C5). Only one strategy runs per invocation; `IGNORE` is a
/// no-op and never spins up a second pool pass.
pub struct OrphanResolver<P: CrawlerPlugin> {
    plugin: Arc<P>,
    store: Arc<CrawlDataStore>,
    processor: Arc<ReferenceProcessor<P>>,
    strategy: OrphansStrategy,
    num_threads: usize,
    max_documents: Option<u64>,
    idle_backoff: std::time::Duration,
    progress_log_interval: std::time::Duration,
    events: broadcast::Sender<EngineEvent>,
}

impl<P: CrawlerPlugin + 'static> OrphanResolver<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plugin: Arc<P>,
        store: Arc<CrawlDataStore>,
        processor: Arc<ReferenceProcessor<P>>,
        strategy: OrphansStrategy,
        num_threads: usize,
        max_documents: Option<u64>,
        idle_backoff: std::time::Duration,
        progress_log_interval: std::time::Duration,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            plugin,
            store,
            processor,
            strategy,
            num_threads,
            max_documents,
            idle_backoff,
            progress_log_interval,
            events,
        }
    }

    /// Returns `Ok(true)` if the pass ran cleanly (or was a no-op), `Ok(false)`
    /// if it was stopped, `Err` on a `stopOnExceptions` fatal failure.
    pub async fn run(&self) -> Result<bool, EngineError> {
        let (mode, filter) = match self.strategy {
            OrphansStrategy::Ignore => return Ok(true),
            OrphansStrategy::Process => (ProcessingMode::OrphanReprocess, true),
            OrphansStrategy::Delete => (ProcessingMode::OrphanDelete, false),
        };

        if mode != ProcessingMode::OrphanDelete {
            if let Some(cap) = self.max_documents {
                if cap > 0 && self.store.processed_count() >= cap {
                    return Ok(true);
                }
            }
        }

        let orphans = self.store.cache_snapshot()?;
        let mut enqueued = 0usize;
        for cached in orphans {
            let record = CrawlRecord::new(cached.reference.clone());
            if filter && !self.plugin.filter_reference(&record).await {
                continue;
            }
            if self.store.queue(record)? {
                enqueued += 1;
            }
        }

        if enqueued == 0 {
            return Ok(true);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new(
            self.processor.clone(),
            self.store.clone(),
            self.num_threads,
            self.max_documents,
            self.idle_backoff,
            self.progress_log_interval,
            self.events.clone(),
            stop,
        );
        pool.run(mode).await
    }
}
