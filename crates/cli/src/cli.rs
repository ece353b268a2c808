use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crawlkit_core::ErrorKind;
use crawlkit_engine::{EngineConfig, OrphansStrategy};

/// CLI-facing mirror of [`OrphansStrategy`] (`clap::ValueEnum` can't be
/// derived on a foreign type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OrphansArg {
    Ignore,
    Process,
    Delete,
}

impl From<OrphansArg> for OrphansStrategy {
    fn from(value: OrphansArg) -> Self {
        match value {
            OrphansArg::Ignore => OrphansStrategy::Ignore,
            OrphansArg::Process => OrphansStrategy::Process,
            OrphansArg::Delete => OrphansStrategy::Delete,
        }
    }
}

/// CLI-facing mirror of [`ErrorKind`], selecting the `stopOnExceptions`
/// allow-list (spec §6, §9: compared by structural kind, not message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorKindArg {
    Fetch,
    Import,
    Commit,
    Io,
    Other,
}

impl From<ErrorKindArg> for ErrorKind {
    fn from(value: ErrorKindArg) -> Self {
        match value {
            ErrorKindArg::Fetch => ErrorKind::Fetch,
            ErrorKindArg::Import => ErrorKind::Import,
            ErrorKindArg::Commit => ErrorKind::Commit,
            ErrorKindArg::Io => ErrorKind::Io,
            ErrorKindArg::Other => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "crawlkit", version, about = "Filesystem-backed crawlkit demo crawler")]
pub struct Cli {
    /// Crawler identity; scopes the durable store and download area.
    #[arg(long, env = "CRAWLKIT_ID", default_value = "default")]
    pub id: String,

    /// Root directory to crawl; every regular file under it seeds a reference.
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Per-crawler workspace root for the durable store and manifest.
    #[arg(long, env = "CRAWLKIT_WORK_DIR", default_value = ".crawlkit")]
    pub work_dir: PathBuf,

    /// Number of concurrent workers.
    #[arg(
        short = 't',
        long = "threads",
        env = "CRAWLKIT_THREADS",
        default_value_t = EngineConfig::DEFAULT_NUM_THREADS
    )]
    pub num_threads: usize,

    /// Maximum references to process this run; -1 disables the cap.
    #[arg(long = "max-documents", env = "CRAWLKIT_MAX_DOCUMENTS", default_value_t = -1)]
    pub max_documents: i64,

    /// Strategy for references seen in the prior run's cache but not re-seen now.
    #[arg(long = "orphans", env = "CRAWLKIT_ORPHANS", value_enum, default_value_t = OrphansArg::Ignore)]
    pub orphans: OrphansArg,

    /// Error kinds that abort the whole crawl instead of only the reference that raised them.
    #[arg(long = "stop-on", env = "CRAWLKIT_STOP_ON", value_enum)]
    pub stop_on: Vec<ErrorKindArg>,

    /// Resume from a prior run's durable store instead of rolling it into cache.
    #[arg(long, env = "CRAWLKIT_RESUME", default_value_t = false)]
    pub resume: bool,
}

impl Cli {
    /// `-1` (the source configuration's disable sentinel) maps to `None`.
    pub fn max_documents(&self) -> Option<u64> {
        if self.max_documents < 0 {
            None
        } else {
            Some(self.max_documents as u64)
        }
    }
}
