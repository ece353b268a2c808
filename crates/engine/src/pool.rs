use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;

use crawlkit_core::CrawlerPlugin;

use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::processor::{ProcessingMode, ReferenceProcessor};
use crate::store::CrawlDataStore;

/// A fixed pool of `num_threads` symmetric workers (spec §4.4, C4).
///
/// Unlike the teacher's dispatcher/worker split (`EngineRuntime` funnels jobs
/// to idle workers over `mpsc`), every worker here independently claims work
/// via [`CrawlDataStore::next_queued`] — the store's atomic claim point
/// already gives each worker everything a dispatcher would otherwise hand
/// out, so there is no benefit to routing through one.
pub struct WorkerPool<P: CrawlerPlugin> {
    processor: Arc<ReferenceProcessor<P>>,
    store: Arc<CrawlDataStore>,
    num_threads: usize,
    max_documents: Option<u64>,
    idle_backoff: Duration,
    progress_log_interval: Duration,
    events: broadcast::Sender<EngineEvent>,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl<P: CrawlerPlugin + 'static> WorkerPool<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processor: Arc<ReferenceProcessor<P>>,
        store: Arc<CrawlDataStore>,
        num_threads: usize,
        max_documents: Option<u64>,
        idle_backoff: Duration,
        progress_log_interval: Duration,
        events: broadcast::Sender<EngineEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            processor,
            store,
            num_threads,
            max_documents,
            idle_backoff,
            progress_log_interval,
            events,
            stop,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Wake any workers currently parked in the idle back-off sleep (mirrors
    /// the teacher's `EngineInner::request_stop` notify-on-stop pattern).
    pub fn notify_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Run the pool to completion in `mode`. Returns `Ok(true)` if the pool
    /// drained normally, `Ok(false)` if it was stopped externally or by
    /// `maxDocuments`, and `Err` if a worker hit a `stopOnExceptions`-listed
    /// failure.
    pub async fn run(&self, mode: ProcessingMode) -> Result<bool, EngineError> {
        let mut workers = JoinSet::new();
        for _ in 0..self.num_threads {
            let processor = self.processor.clone();
            let store = self.store.clone();
            let stop = self.stop.clone();
            let wake = self.wake.clone();
            let events = self.events.clone();
            let idle_backoff = self.idle_backoff;
            let progress_log_interval = self.progress_log_interval;
            let max_documents = self.max_documents;
            workers.spawn(async move {
                worker_loop(
                    processor,
                    store,
                    stop,
                    wake,
                    events,
                    idle_backoff,
                    progress_log_interval,
                    max_documents,
                    mode,
                )
                .await
            });
        }

        let mut fatal = None;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.notify_stop();
                    fatal.get_or_insert(e);
                }
                Err(join_err) => {
                    self.notify_stop();
                    fatal.get_or_insert(EngineError::Cancellation(format!("worker panicked: {join_err}")));
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(!self.stop.load(Ordering::SeqCst))
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<P: CrawlerPlugin + 'static>(
    processor: Arc<ReferenceProcessor<P>>,
    store: Arc<CrawlDataStore>,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    events: broadcast::Sender<EngineEvent>,
    idle_backoff: Duration,
    progress_log_interval: Duration,
    max_documents: Option<u64>,
    mode: ProcessingMode,
) -> Result<(), EngineError> {
    let mut last_progress = tokio::time::Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        if mode != ProcessingMode::OrphanDelete {
            if let Some(cap) = max_documents {
                if cap > 0 && store.processed_count() >= cap {
                    return Ok(());
                }
            }
        }

        match store.next_queued()? {
            Some(record) => {
                processor.process(record, mode).await?;
                if last_progress.elapsed() >= progress_log_interval {
                    last_progress = tokio::time::Instant::now();
                    let _ = events.send(EngineEvent::Progress {
                        processed: store.processed_count(),
                        queued: store.queued_count()? as u64,
                    });
                }
            }
            None => {
                if store.active_count()? == 0 && store.is_queue_empty()? {
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(idle_backoff.max(Duration::from_millis(1))) => {}
                    _ = wake.notified() => {}
                }
            }
        }
    }
}
