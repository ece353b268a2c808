use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crawlkit_core::{CrawlRecord, Reference, Stage};

use crate::error::EngineError;

/// On-disk representation of a [`CrawlDataStore`], generalizing the
/// teacher's flat `InflightFile` (`crates/client-engine/src/inflight.rs`)
/// from one job list to the spec's four stage partitions.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    queued: Vec<CrawlRecord>,
    #[serde(default)]
    active: Vec<CrawlRecord>,
    #[serde(default)]
    processed: Vec<CrawlRecord>,
    #[serde(default)]
    cached: Vec<CrawlRecord>,
}

#[derive(Default)]
struct StoreState {
    queued: HashMap<String, CrawlRecord>,
    active: HashMap<String, CrawlRecord>,
    processed: HashMap<String, CrawlRecord>,
    cached: HashMap<String, CrawlRecord>,
}

impl StoreState {
    fn from_snapshot(snapshot: StoreSnapshot, resume: bool) -> (Self, u64) {
        let mut state = StoreState::default();

        if resume {
            for record in snapshot.queued {
                state.queued.insert(record.reference.store_key(), record);
            }
            // Any record stranded in ACTIVE from an interrupted prior run is
            // reclassified back to QUEUED before workers start (spec §4.1
            // crash recovery, B4).
            for mut record in snapshot.active {
                record.stage = Stage::Queued;
                state.queued.insert(record.reference.store_key(), record);
            }
            for record in &snapshot.processed {
                state.processed.insert(record.reference.store_key(), record.clone());
            }
            for record in snapshot.cached {
                state.cached.insert(record.reference.store_key(), record);
            }
        } else {
            // Not resuming: prior PROCESSED rolls into CACHED wholesale and
            // the active side is emptied (spec §3 Lifecycle, I4).
            for mut record in snapshot.processed {
                record.stage = Stage::Cached;
                state.cached.insert(record.reference.store_key(), record);
            }
        }

        let processed_count = state.processed.len() as u64;
        (state, processed_count)
    }

    fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: 1,
            queued: self.queued.values().cloned().collect(),
            active: self.active.values().cloned().collect(),
            processed: self.processed.values().cloned().collect(),
            cached: self.cached.values().cloned().collect(),
        }
    }
}

/// Durable, ordered multi-set of per-reference records partitioned by stage
/// (spec §4.1, C1).
///
/// Internals are a single [`std::sync::Mutex`]-guarded map-of-maps: every
/// operation is a synchronous map mutation, never an `.await`, so a blocking
/// mutex is the right tool here — the same reasoning the teacher applies to
/// `EngineInner`'s atomics rather than an async lock.
pub struct CrawlDataStore {
    state: Mutex<StoreState>,
    processed_count: AtomicU64,
    closed: AtomicBool,
    snapshot_path: PathBuf,
}

impl CrawlDataStore {
    /// Open (or create) the store for `work_dir`/`id`. When `resume` is
    /// `false`, the previous run's PROCESSED partition rolls into CACHED and
    /// QUEUED/ACTIVE are cleared; when `true`, QUEUED/ACTIVE carry over with
    /// any stranded ACTIVE reclassified to QUEUED (spec §3 Lifecycle).
    pub async fn open(work_dir: &Path, id: &str, resume: bool) -> Result<Self, EngineError> {
        let snapshot_path = work_dir.join(format!("{id}.crawlstore.json"));
        let path_for_load = snapshot_path.clone();
        let snapshot = tokio::task::spawn_blocking(move || load_snapshot(&path_for_load))
            .await
            .map_err(|err| EngineError::Store(format!("open store: join error: {err}")))??;

        let (state, processed_count) = StoreState::from_snapshot(snapshot, resume);

        Ok(Self {
            state: Mutex::new(state),
            processed_count: AtomicU64::new(processed_count),
            closed: AtomicBool::new(false),
            snapshot_path,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Store("store is closed".to_string()));
        }
        Ok(self.state.lock().unwrap_or_else(|poison| poison.into_inner()))
    }

    /// Place `record` in QUEUED. Idempotent per I6: a no-op when the
    /// reference already has a current-run record in QUEUED or ACTIVE.
    pub fn queue(&self, mut record: CrawlRecord) -> Result<bool, EngineError> {
        if record.reference.as_str().is_empty() {
            return Err(EngineError::Config("reference must not be empty".into()));
        }
        let mut state = self.lock()?;
        let key = record.reference.store_key();
        if state.queued.contains_key(&key) || state.active.contains_key(&key) {
            return Ok(false);
        }
        record.stage = Stage::Queued;
        state.queued.insert(key, record);
        Ok(true)
    }

    /// Atomically move one QUEUED record to ACTIVE and return it (spec I2:
    /// claim-on-dequeue). Concurrent callers never receive the same record.
    pub fn next_queued(&self) -> Result<Option<CrawlRecord>, EngineError> {
        let mut state = self.lock()?;
        let Some(key) = state.queued.keys().next().cloned() else {
            return Ok(None);
        };
        let mut record = state.queued.remove(&key).expect("key just observed");
        record.stage = Stage::Active;
        state.active.insert(key, record.clone());
        Ok(Some(record))
    }

    /// Move the claimed record from ACTIVE to PROCESSED, overwriting fields
    /// with the final record (spec I3).
    pub fn processed(&self, mut record: CrawlRecord) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        let key = record.reference.store_key();
        state.active.remove(&key);
        record.stage = Stage::Processed;
        state.processed.insert(key, record);
        self.processed_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// The prior-run snapshot for `reference`, or `None`. Never returns a
    /// current-run row.
    pub fn get_cached(&self, reference: &Reference) -> Result<Option<CrawlRecord>, EngineError> {
        let state = self.lock()?;
        Ok(state.cached.get(&reference.store_key()).cloned())
    }

    /// A point-in-time snapshot of the entire CACHED partition (spec:
    /// "lazy sequence... stable under concurrent writes to other
    /// partitions"). Realized eagerly under the lock rather than streamed,
    /// since the in-memory partitions are never large enough to warrant
    /// lazy iteration; restartable simply by calling again.
    pub fn cache_snapshot(&self) -> Result<Vec<CrawlRecord>, EngineError> {
        let state = self.lock()?;
        Ok(state.cached.values().cloned().collect())
    }

    pub fn active_count(&self) -> Result<usize, EngineError> {
        Ok(self.lock()?.active.len())
    }

    pub fn is_queue_empty(&self) -> Result<bool, EngineError> {
        Ok(self.lock()?.queued.is_empty())
    }

    pub fn queued_count(&self) -> Result<usize, EngineError> {
        Ok(self.lock()?.queued.len())
    }

    /// Total PROCESSED rows written this run (spec P3).
    pub fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::SeqCst)
    }

    /// Persist the current state to disk without closing the store.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let snapshot = self.lock()?.to_snapshot();
        persist_snapshot(self.snapshot_path.clone(), snapshot).await
    }

    /// Flush and close the store; subsequent operations fail.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.checkpoint().await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<StoreSnapshot, EngineError> {
    if !path.exists() {
        return Ok(StoreSnapshot::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|err| EngineError::Store(format!("read store snapshot: {err}")))?;
    serde_json::from_str(&raw).map_err(|err| EngineError::Store(format!("parse store snapshot: {err}")))
}

async fn persist_snapshot(path: PathBuf, snapshot: StoreSnapshot) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || persist_snapshot_blocking(&path, &snapshot))
        .await
        .map_err(|err| EngineError::Store(format!("persist store: join error: {err}")))?
}

fn persist_snapshot_blocking(path: &Path, snapshot: &StoreSnapshot) -> Result<(), EngineError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|err| EngineError::Store(format!("create store dir: {err}")))?;
    }
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|err| EngineError::Store(format!("serialize store: {err}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|err| EngineError::Store(format!("write store snapshot: {err}")))?;
    std::fs::rename(&tmp, path).map_err(|err| EngineError::Store(format!("rename store snapshot: {err}")))?;
    Ok(())
}
