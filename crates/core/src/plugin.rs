use std::io::Read;

use async_trait::async_trait;

use crate::record::CrawlRecord;
use crate::reference::Reference;

/// Structural error kind, used to match against a configured
/// `stopOnExceptions` allow-list by tag identity rather than message text
/// (spec §9 Design Note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fetching the reference's bytes failed.
    Fetch,
    /// The importer pipeline failed.
    Import,
    /// The committer pipeline failed.
    Commit,
    /// A filesystem/stream I/O failure.
    Io,
    /// Anything else a plugin wants to surface as fatal-capable.
    Other,
}

/// An error raised by a [`CrawlerPlugin`] hook.
///
/// Caught by the [`ReferenceProcessor`](../../crawlkit_engine/index.html) per
/// spec §7 (`PipelineError`): the reference is marked `Error` and processing
/// continues, unless `kind` is in the configured `stopOnExceptions` list, in
/// which case the error is re-raised after `finalize` so the worker stops
/// the pool.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PluginError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// A document bound to one reference as it flows through the pipeline.
///
/// `metadata` carries out-of-band signals between hooks — in particular the
/// `isNew` flag the processor sets before calling the importer (spec §4.3
/// step 2), stored under [`Document::IS_NEW_KEY`].
///
/// The optional lazy input stream (spec §4.3 step 1, §5 "Stream factory") is
/// held behind a `RefCell` rather than requiring `&mut Document` everywhere:
/// every hook in [`CrawlerPlugin`] only ever sees `&Document`, and attaching/
/// releasing the stream is an internal bookkeeping detail, not part of the
/// hook contract.
pub struct Document {
    pub metadata: serde_json::Map<String, serde_json::Value>,
    stream: std::cell::RefCell<Option<Box<dyn Read + Send>>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("metadata", &self.metadata)
            .field("has_stream", &self.stream.borrow().is_some())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self { metadata: serde_json::Map::new(), stream: std::cell::RefCell::new(None) }
    }
}

impl Document {
    pub const IS_NEW_KEY: &'static str = "isNew";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_is_new(&mut self, is_new: bool) {
        self.metadata.insert(Self::IS_NEW_KEY.to_string(), is_new.into());
    }

    pub fn is_new(&self) -> bool {
        self.metadata.get(Self::IS_NEW_KEY).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Attach a stream opened from the shared [`StreamFactory`] (spec §4.3
    /// step 1). Each stream is owned by this document's processing.
    pub fn attach_stream(&self, stream: Box<dyn Read + Send>) {
        *self.stream.borrow_mut() = Some(stream);
    }

    /// Take the attached stream for reading, if one was opened.
    pub fn take_stream(&self) -> Option<Box<dyn Read + Send>> {
        self.stream.borrow_mut().take()
    }

    /// Release the streamed content. Idempotent — safe to call on every exit
    /// path, including failure (spec §4.3 step 7: "Release the document's
    /// streamed content... must run on all exit paths").
    pub fn release_stream(&self) {
        self.stream.borrow_mut().take();
    }
}

/// Thread-safe allocator of lazy input streams (spec §5: "Stream factory").
///
/// Each stream is owned by a single reference's processing and released in
/// `finalize`.
pub trait StreamFactory: Send + Sync {
    fn open(&self, reference: &Reference) -> std::io::Result<Box<dyn Read + Send>>;
}

/// Child sub-document discovered while importing a reference (spec §3:
/// "Embedded reference").
#[derive(Debug, Clone)]
pub struct EmbeddedResponse {
    pub reference: Reference,
    pub response: ImporterResponse,
}

/// The importer pipeline's per-reference result (spec §4.3).
#[derive(Debug, Clone)]
pub struct ImporterResponse {
    pub is_success: bool,
    pub meta_checksum: Option<String>,
    pub content_checksum: Option<String>,
    pub content_type: Option<String>,
    pub children: Vec<EmbeddedResponse>,
}

impl ImporterResponse {
    pub fn success() -> Self {
        Self {
            is_success: true,
            meta_checksum: None,
            content_checksum: None,
            content_type: None,
            children: Vec::new(),
        }
    }

    pub fn rejected() -> Self {
        Self { is_success: false, ..Self::success() }
    }
}

/// The downstream sink a [`CrawlerPlugin`] may configure (spec §6).
///
/// Invoked concurrently by the worker pool; implementations must be
/// thread-safe (spec §5).
#[async_trait]
pub trait Committer: Send + Sync {
    async fn upsert(&self, reference: &Reference, doc: &Document) -> Result<(), PluginError>;
    async fn remove(&self, reference: &Reference, metadata: &serde_json::Map<String, serde_json::Value>) -> Result<(), PluginError>;
    async fn commit(&self) -> Result<(), PluginError>;
}

/// The capability a concrete crawler implements to specialize the engine
/// (spec §6, §9 Design Note: composition over subclassing).
///
/// Every method has a sensible default for the genuinely optional hooks
/// (`init_crawl_data`, `before_finalize`, `wrap_document`,
/// `mark_reference_variations_as_processed`); the required hooks
/// (`execute_importer_pipeline`, `create_embedded_crawl_data`) have no
/// default because the engine cannot meaningfully proceed without them.
#[async_trait]
pub trait CrawlerPlugin: Send + Sync {
    /// Run once before the crawl starts (spec §6:
    /// `prepareExecution(statusUpdater, suite, store, resume)`). `statusUpdater`
    /// and `suite` belong to the out-of-scope job-suite/status-reporting
    /// framework (spec §1 Non-goals) and `store` isn't representable from
    /// `crawlkit-core` (the concrete store type lives in `crawlkit-engine`,
    /// which depends on this crate, not the other way around); `resume` is
    /// the one parameter that survives the trim. An `Err` here is fatal
    /// (spec §7: `ConfigError`, "Fatal at `prepareExecution`").
    async fn prepare_execution(&self, resume: bool) -> Result<(), PluginError> {
        let _ = resume;
        Ok(())
    }

    /// Run once at shutdown, after the finish/stopped event fires and
    /// before the store closes (spec §6:
    /// `cleanupExecution(statusUpdater, suite, store)`, spec §4.6 step 9).
    /// Same trim as `prepare_execution`; infallible by design — the spec
    /// documents no fatal error path for this hook, so the engine always
    /// proceeds to close the store regardless of what this hook does.
    async fn cleanup_execution(&self) {}

    /// Filter + enqueue decision for a discovered reference (spec §6:
    /// `executeQueuePipeline`). Returning `false` means the reference is
    /// dropped before ever reaching `Queued`.
    async fn filter_reference(&self, record: &CrawlRecord) -> bool {
        let _ = record;
        true
    }

    /// Run the external importer pipeline. `None` means the pipeline
    /// rejected the reference before importing (spec §4.3 step 4).
    async fn execute_importer_pipeline(
        &self,
        current: &CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
    ) -> Result<Option<ImporterResponse>, PluginError>;

    /// Run the external committer pipeline for a successful import. May or
    /// may not ultimately call the configured [`Committer`]'s `upsert`; also
    /// applies document filters and checksum gating (spec §4.3).
    async fn execute_committer_pipeline(
        &self,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
    ) -> Result<(), PluginError>;

    /// Wrap/augment a freshly constructed document before it is used.
    fn wrap_document(&self, record: &CrawlRecord, doc: Document) -> Document {
        let _ = record;
        doc
    }

    /// Optional hook run right after the cached snapshot is fetched (spec
    /// §4.3 step 3).
    fn init_crawl_data(&self, current: &mut CrawlRecord, cached: Option<&CrawlRecord>, doc: &Document) {
        let _ = (current, cached, doc);
    }

    /// Optional hook run just before `finalize` applies the cache-fill and
    /// spoil-handling rules.
    fn before_finalize(&self, current: &mut CrawlRecord, cached: Option<&CrawlRecord>, doc: &Document) {
        let _ = (current, cached, doc);
    }

    /// Construct the record for a child reference discovered while
    /// importing `parent` (spec §4.3: `processImportResponse` recursion).
    fn create_embedded_crawl_data(&self, child_reference: Reference, parent: &CrawlRecord) -> CrawlRecord {
        let mut record = CrawlRecord::new(child_reference);
        record.parent_root_reference = Some(
            parent.parent_root_reference.clone().unwrap_or_else(|| parent.reference.clone()),
        );
        record
    }

    /// Optional hook letting implementations that track reference aliases
    /// (e.g. redirects) close them out once `current` is finalized. The
    /// engine does not model aliases itself — any store mutation this
    /// requires is the plugin's own side effect.
    fn mark_reference_variations_as_processed(&self, current: &CrawlRecord) {
        let _ = current;
    }

    /// The downstream sink, if one is configured for this crawler.
    fn committer(&self) -> Option<&dyn Committer> {
        None
    }

    /// The shared allocator of lazy input streams, if this crawler needs one
    /// (spec §4.3 step 1, §5). Most plugins fetch their own bytes directly
    /// inside `execute_importer_pipeline` and have no use for this.
    fn stream_factory(&self) -> Option<&dyn StreamFactory> {
        None
    }
}
