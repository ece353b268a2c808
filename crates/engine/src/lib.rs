//! Concurrency, durability and orchestration for a `crawlkit-core`
//! `CrawlerPlugin`: the durable store (C1), the reference processor (C3),
//! the worker pool (C4), orphan reconciliation (C5) and the top-level
//! `CrawlerEngine` (C6).

mod config;
mod engine;
mod error;
mod event;
mod orphan;
mod pool;
mod processor;
mod store;

pub use config::{EngineConfig, OrphansStrategy};
pub use engine::{CrawlerEngine, EngineStatus};
pub use error::EngineError;
pub use event::EngineEvent;
pub use orphan::OrphanResolver;
pub use pool::WorkerPool;
pub use processor::{ProcessingMode, ReferenceProcessor};
pub use store::CrawlDataStore;
