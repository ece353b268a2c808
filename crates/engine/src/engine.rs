use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crawlkit_core::{CrawlRecord, CrawlerPlugin, Reference, SpoiledPolicy};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::orphan::OrphanResolver;
use crate::pool::WorkerPool;
use crate::processor::{ProcessingMode, ReferenceProcessor};
use crate::store::CrawlDataStore;

/// In-process snapshot exposed through a [`watch`] channel (spec §6
/// "monitoring endpoint"): the idiomatic analogue of the source's optional
/// JMX bean, since a Rust binary has no JVM management surface to plug into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub processed: u64,
    pub queued: u64,
    pub active: u64,
}

/// Top-level orchestrator (spec §4.6, C6). Generic over a [`CrawlerPlugin`]
/// rather than built on an abstract base class (spec §9 Design Note).
pub struct CrawlerEngine<P: CrawlerPlugin> {
    config: EngineConfig,
    plugin: Arc<P>,
    store: Arc<CrawlDataStore>,
    spoiled_policy: Option<Arc<dyn SpoiledPolicy>>,
    events: broadcast::Sender<EngineEvent>,
    status_tx: watch::Sender<EngineStatus>,
    stop: Arc<AtomicBool>,
}

impl<P: CrawlerPlugin + 'static> CrawlerEngine<P> {
    /// Create the work directory and open the durable store (spec §4.6 step 1).
    pub async fn open(
        config: EngineConfig,
        plugin: Arc<P>,
        spoiled_policy: Option<Arc<dyn SpoiledPolicy>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .map_err(|e| EngineError::Store(format!("create work dir: {e}")))?;

        let store = Arc::new(CrawlDataStore::open(&config.work_dir, &config.id, config.resume).await?);
        let (events, _events_rx) = broadcast::channel(1024);
        let (status_tx, _status_rx) = watch::channel(EngineStatus::default());

        Ok(Self {
            config,
            plugin,
            store,
            spoiled_policy,
            events,
            status_tx,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// An immediate snapshot, computed directly from the store rather than
    /// waiting on the periodic `watch_status` ticker.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            processed: self.store.processed_count(),
            queued: self.store.queued_count().unwrap_or(0) as u64,
            active: self.store.active_count().unwrap_or(0) as u64,
        }
    }

    /// Cooperative stop: workers finish their current reference, then exit
    /// at the next dequeue boundary (spec §5 Cancellation).
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(EngineEvent::CrawlerStopping);
        }
    }

    /// Run the crawl to completion, seeding `seeds` through the queue
    /// pipeline filter before the main pool starts (spec §4.6 steps 2-9).
    pub async fn run(&self, seeds: impl IntoIterator<Item = Reference>) -> Result<(), EngineError> {
        self.plugin
            .prepare_execution(self.config.resume)
            .await
            .map_err(|e| EngineError::Config(e.message))?;

        for reference in seeds {
            let record = CrawlRecord::new(reference);
            if self.plugin.filter_reference(&record).await {
                self.store.queue(record)?;
            }
        }

        let _ = self.events.send(if self.config.resume {
            EngineEvent::CrawlerResumed
        } else {
            EngineEvent::CrawlerStarted
        });

        let processor = Arc::new(ReferenceProcessor::new(
            self.plugin.clone(),
            self.store.clone(),
            self.spoiled_policy.clone(),
            self.config.stop_on_exceptions.clone(),
            self.events.clone(),
        ));

        let autosave = self.spawn_autosave();
        let status_updater = self.spawn_status_updater();

        let result = self.run_inner(processor).await;

        autosave.abort();
        status_updater.abort();

        match result {
            Ok(finished_cleanly) => {
                if let Some(committer) = self.plugin.committer() {
                    committer.commit().await.map_err(EngineError::Pipeline)?;
                }
                remove_empty_dirs(&self.config.download_dir()).await?;
                let _ = self.events.send(if finished_cleanly {
                    EngineEvent::CrawlerFinished
                } else {
                    EngineEvent::CrawlerStopped
                });
                self.plugin.cleanup_execution().await;
                self.store.close().await?;
                Ok(())
            }
            Err(e) => {
                let _ = self.events.send(EngineEvent::CrawlerStopped);
                self.plugin.cleanup_execution().await;
                let _ = self.store.close().await;
                Err(e)
            }
        }
    }

    /// Runs the main pool and, if it drained cleanly, the orphan pass.
    /// Returns whether the crawl finished cleanly (spec §9 resolved Open
    /// Question: `maxDocuments` stopping the pool early still counts as a
    /// clean finish; only an explicit `request_stop`/fatal error does not).
    async fn run_inner(&self, processor: Arc<ReferenceProcessor<P>>) -> Result<bool, EngineError> {
        let pool = WorkerPool::new(
            processor.clone(),
            self.store.clone(),
            self.config.num_threads,
            self.config.max_documents,
            self.config.idle_backoff,
            self.config.progress_log_interval,
            self.events.clone(),
            self.stop.clone(),
        );

        let drained = pool.run(ProcessingMode::Normal).await?;
        let stopped_externally = self.stop.load(Ordering::SeqCst);

        if drained && !stopped_externally {
            let resolver = OrphanResolver::new(
                self.plugin.clone(),
                self.store.clone(),
                processor,
                self.config.orphans_strategy,
                self.config.num_threads,
                self.config.max_documents,
                self.config.idle_backoff,
                self.config.progress_log_interval,
                self.events.clone(),
            );
            resolver.run().await?;
        }

        Ok(drained && !stopped_externally)
    }

    fn spawn_autosave(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let period = self.config.checkpoint_interval;
        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it.
            loop {
                ticker.tick().await;
                let _ = store.checkpoint().await;
            }
        })
    }

    fn spawn_status_updater(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let status_tx = self.status_tx.clone();
        let period = self.config.progress_log_interval;
        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let snapshot = EngineStatus {
                    processed: store.processed_count(),
                    queued: store.queued_count().unwrap_or(0) as u64,
                    active: store.active_count().unwrap_or(0) as u64,
                };
                let _ = status_tx.send(snapshot);
            }
        })
    }
}

/// Spec §4.6 step 8: recursive post-order sweep removing empty directories
/// under the crawler's download area, run off the async runtime the same
/// way the teacher shells blocking filesystem work via `spawn_blocking`.
async fn remove_empty_dirs(root: &Path) -> Result<(), EngineError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || remove_empty_dirs_blocking(&root))
        .await
        .map_err(|e| EngineError::Store(format!("remove empty dirs: join error: {e}")))?
}

fn remove_empty_dirs_blocking(dir: &Path) -> Result<(), EngineError> {
    if !dir.is_dir() {
        return Ok(());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EngineError::Store(format!("read_dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::Store(format!("read_dir entry: {e}")))?;
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs_blocking(&path)?;
        }
    }
    let is_empty = std::fs::read_dir(dir)
        .map_err(|e| EngineError::Store(format!("read_dir {}: {e}", dir.display())))?
        .next()
        .is_none();
    if is_empty {
        std::fs::remove_dir(dir)
            .map_err(|e| EngineError::Store(format!("remove_dir {}: {e}", dir.display())))?;
    }
    Ok(())
}
