#![deny(unreachable_pub)]

//! Shared data model and plugin contract for the `crawlkit` crawl engine.
//!
//! This crate has no opinion about concurrency or I/O; it defines the
//! vocabulary ([`Reference`], [`CrawlRecord`], [`State`], [`Stage`]) and the
//! seam ([`CrawlerPlugin`]) that `crawlkit-engine` drives.

mod plugin;
mod policy;
mod record;
mod reference;

pub use plugin::{
    Committer, Document, EmbeddedResponse, ErrorKind, ImporterResponse, PluginError, StreamFactory,
    CrawlerPlugin,
};
pub use policy::{resolve_disposition, DefaultSpoiledPolicy, SpoiledPolicy};
pub use record::{CrawlRecord, Disposition, Stage, State};
pub use reference::{Reference, MAX_STORE_KEY_LEN};
