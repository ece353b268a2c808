use std::sync::Arc;

use tokio::sync::broadcast;

use crawlkit_core::{
    resolve_disposition, CrawlRecord, CrawlerPlugin, Disposition, Document, ErrorKind, PluginError,
    Reference, SpoiledPolicy, State,
};

use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::store::CrawlDataStore;

/// The shared context a claimed reference is processed under (spec §4.3
/// "Inputs per invocation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Normal,
    OrphanReprocess,
    OrphanDelete,
}

impl ProcessingMode {
    fn is_delete(self) -> bool {
        matches!(self, ProcessingMode::OrphanDelete)
    }
}

/// Runs one claimed [`CrawlRecord`] through its full lifecycle (spec §4.3,
/// C3). Stateless aside from the shared collaborators it holds; safe to call
/// concurrently from any number of workers.
pub struct ReferenceProcessor<P: CrawlerPlugin> {
    plugin: Arc<P>,
    store: Arc<CrawlDataStore>,
    spoiled_policy: Option<Arc<dyn SpoiledPolicy>>,
    stop_on_exceptions: Vec<ErrorKind>,
    events: broadcast::Sender<EngineEvent>,
}

impl<P: CrawlerPlugin> ReferenceProcessor<P> {
    pub fn new(
        plugin: Arc<P>,
        store: Arc<CrawlDataStore>,
        spoiled_policy: Option<Arc<dyn SpoiledPolicy>>,
        stop_on_exceptions: Vec<ErrorKind>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { plugin, store, spoiled_policy, stop_on_exceptions, events }
    }

    /// Entry point for a just-claimed reference (spec §4.3 steps 1-5).
    ///
    /// Returns `Err` only when the failure's kind matched the configured
    /// `stopOnExceptions` allow-list; by then `finalize` has already run, so
    /// the caller's only remaining job is to stop the pool.
    pub async fn process(&self, mut current: CrawlRecord, mode: ProcessingMode) -> Result<(), EngineError> {
        let doc = self.plugin.wrap_document(&current, Document::new());
        let cached = self.store.get_cached(&current.reference)?;
        let mut doc = doc;
        doc.set_is_new(cached.is_none());
        if let Some(factory) = self.plugin.stream_factory() {
            if let Ok(stream) = factory.open(&current.reference) {
                doc.attach_stream(stream);
            }
        }
        self.plugin.init_crawl_data(&mut current, cached.as_ref(), &doc);

        if mode.is_delete() {
            return match self.delete_reference(&mut current, &doc).await {
                Ok(()) => self.finalize(&mut current, cached.as_ref(), &doc).await,
                Err(e) => self.handle_fatal(&mut current, cached.as_ref(), &doc, e).await,
            };
        }

        match self.plugin.execute_importer_pipeline(&current, cached.as_ref(), &doc).await {
            Ok(None) => {
                // The pipeline rejected before importing. Don't clobber a
                // state already set to something non-new-or-modified by
                // `initCrawlData` (spec §4.3 step 4).
                let already_decided = current.state.is_some_and(|s| !s.is_new_or_modified());
                if !already_decided {
                    current.state = Some(State::Rejected);
                }
                self.finalize(&mut current, cached.as_ref(), &doc).await
            }
            Ok(Some(response)) => {
                self.process_import_response(response, &mut current, cached.as_ref(), &doc, mode).await
            }
            Err(e) => self.handle_fatal(&mut current, cached.as_ref(), &doc, e).await,
        }
    }

    /// Recursive over nested child responses (spec §4.3
    /// `processImportResponse`). Order across siblings is unspecified;
    /// traversal here is depth-first.
    async fn process_import_response(
        &self,
        response: crawlkit_core::ImporterResponse,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
        mode: ProcessingMode,
    ) -> Result<(), EngineError> {
        current.meta_checksum = response.meta_checksum.clone().or_else(|| current.meta_checksum.clone());
        current.content_checksum =
            response.content_checksum.clone().or_else(|| current.content_checksum.clone());
        current.content_type = response.content_type.clone().or_else(|| current.content_type.clone());

        let commit_result = if response.is_success {
            let _ = self.events.send(EngineEvent::DocumentImported { record: current.clone() });
            self.plugin.execute_committer_pipeline(current, cached, doc).await
        } else {
            current.state = Some(State::Rejected);
            let _ = self.events.send(EngineEvent::RejectedImport { record: current.clone() });
            Ok(())
        };

        if let Err(e) = commit_result {
            let fatal = self.stop_on_exceptions.contains(&e.kind);
            current.state = Some(State::Error);
            let _ =
                self.events.send(EngineEvent::RejectedError { record: current.clone(), message: e.message.clone() });
            self.finalize(current, cached, doc).await?;
            if fatal {
                return Err(EngineError::Pipeline(e));
            }
        } else {
            self.finalize(current, cached, doc).await?;
        }

        for embedded in response.children {
            let child_cached = self.store.get_cached(&embedded.reference)?;
            let mut child_doc = Document::new();
            child_doc.set_is_new(child_cached.is_none());
            let mut child_record = self.plugin.create_embedded_crawl_data(embedded.reference, current);
            self.plugin.init_crawl_data(&mut child_record, child_cached.as_ref(), &child_doc);
            Box::pin(self.process_import_response(
                embedded.response,
                &mut child_record,
                child_cached.as_ref(),
                &child_doc,
                mode,
            ))
            .await?;
        }

        Ok(())
    }

    async fn handle_fatal(
        &self,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
        error: PluginError,
    ) -> Result<(), EngineError> {
        let fatal = self.stop_on_exceptions.contains(&error.kind);
        current.state = Some(State::Error);
        let _ = self
            .events
            .send(EngineEvent::RejectedError { record: current.clone(), message: error.message.clone() });
        self.finalize(current, cached, doc).await?;
        if fatal {
            Err(EngineError::Pipeline(error))
        } else {
            Ok(())
        }
    }

    /// Spec §4.3 `finalize`: bad-status guard, cache-fill, spoil handling,
    /// `processedCount` bookkeeping.
    async fn finalize(
        &self,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
    ) -> Result<(), EngineError> {
        if current.state.is_none() {
            current.state = Some(State::BadStatus);
            let _ = self.events.send(EngineEvent::Warning {
                message: format!("reference {} reached finalize with no state set", current.reference),
            });
        }

        self.plugin.before_finalize(current, cached, doc);

        let state = current.state.expect("set immediately above");

        if !state.is_new_or_modified() {
            if let Some(cached_record) = cached {
                current.fill_from_cache(cached_record);
            }
        }

        if !state.is_good_state() && state != State::Deleted {
            self.apply_spoil_disposition(current, cached, doc, state).await;
        }

        self.store.processed(current.clone())?;
        self.plugin.mark_reference_variations_as_processed(current);
        doc.release_stream();
        Ok(())
    }

    async fn apply_spoil_disposition(
        &self,
        current: &mut CrawlRecord,
        cached: Option<&CrawlRecord>,
        doc: &Document,
        state: State,
    ) {
        let disposition =
            resolve_disposition(self.spoiled_policy.as_deref(), &current.reference, state);

        let Some(cached_record) = cached else { return };
        if cached_record.state == Some(State::Deleted) {
            return;
        }

        let should_delete = match disposition {
            Disposition::Ignore => false,
            Disposition::Delete => true,
            Disposition::GraceOnce => !cached_record.state.is_some_and(State::is_good_state),
        };

        if should_delete {
            if let Err(e) = self.delete_reference(current, doc).await {
                let _ = self.events.send(EngineEvent::Warning {
                    message: format!("delete-on-spoil failed for {}: {}", current.reference, e.message),
                });
            }
        }
    }

    /// Spec §4.3 `deleteReference`.
    async fn delete_reference(&self, current: &mut CrawlRecord, doc: &Document) -> Result<(), PluginError> {
        current.state = Some(State::Deleted);
        if let Some(committer) = self.plugin.committer() {
            committer.remove(&current.reference, &doc.metadata).await?;
        }
        let _ = self
            .events
            .send(EngineEvent::DocumentCommittedRemove { reference: current.reference.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crawlkit_core::{Committer, ImporterResponse};
    use std::sync::Mutex as StdMutex;

    struct FakePlugin {
        removed: StdMutex<Vec<Reference>>,
        upserted: StdMutex<Vec<Reference>>,
        reject: bool,
    }

    impl FakePlugin {
        fn new(reject: bool) -> Self {
            Self { removed: StdMutex::new(Vec::new()), upserted: StdMutex::new(Vec::new()), reject }
        }
    }

    #[async_trait]
    impl Committer for FakePlugin {
        async fn upsert(&self, reference: &Reference, _doc: &Document) -> Result<(), PluginError> {
            self.upserted.lock().unwrap().push(reference.clone());
            Ok(())
        }
        async fn remove(
            &self,
            reference: &Reference,
            _metadata: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<(), PluginError> {
            self.removed.lock().unwrap().push(reference.clone());
            Ok(())
        }
        async fn commit(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[async_trait]
    impl CrawlerPlugin for FakePlugin {
        async fn execute_importer_pipeline(
            &self,
            _current: &CrawlRecord,
            _cached: Option<&CrawlRecord>,
            _doc: &Document,
        ) -> Result<Option<ImporterResponse>, PluginError> {
            if self.reject {
                Ok(None)
            } else {
                Ok(Some(ImporterResponse::success()))
            }
        }

        async fn execute_committer_pipeline(
            &self,
            current: &mut CrawlRecord,
            cached: Option<&CrawlRecord>,
            doc: &Document,
        ) -> Result<(), PluginError> {
            current.state = Some(if cached.is_some() { State::Modified } else { State::New });
            self.upsert(&current.reference, doc).await
        }

        fn committer(&self) -> Option<&dyn Committer> {
            Some(self)
        }
    }

    fn processor(plugin: Arc<FakePlugin>, store: Arc<CrawlDataStore>) -> ReferenceProcessor<FakePlugin> {
        let (tx, _rx) = broadcast::channel(16);
        ReferenceProcessor::new(plugin, store, None, Vec::new(), tx)
    }

    #[tokio::test]
    async fn successful_import_sets_new_state_and_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
        let plugin = Arc::new(FakePlugin::new(false));
        let proc = processor(plugin.clone(), store.clone());

        store.queue(CrawlRecord::new(Reference::new("a"))).unwrap();
        let claimed = store.next_queued().unwrap().unwrap();
        proc.process(claimed, ProcessingMode::Normal).await.unwrap();

        assert_eq!(store.processed_count(), 1);
        assert_eq!(plugin.upserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_import_sets_rejected_state_without_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
        let plugin = Arc::new(FakePlugin::new(true));
        let proc = processor(plugin.clone(), store.clone());

        store.queue(CrawlRecord::new(Reference::new("a"))).unwrap();
        let claimed = store.next_queued().unwrap().unwrap();
        proc.process(claimed, ProcessingMode::Normal).await.unwrap();

        assert_eq!(store.processed_count(), 1);
        assert!(plugin.upserted.lock().unwrap().is_empty());
        // Default policy deletes spoiled references, but there is no cached
        // entry here, so no delete call is made either (P4's precondition).
        assert!(plugin.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_delete_mode_removes_and_marks_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
        let plugin = Arc::new(FakePlugin::new(false));
        let proc = processor(plugin.clone(), store.clone());

        store.queue(CrawlRecord::new(Reference::new("orphan"))).unwrap();
        let claimed = store.next_queued().unwrap().unwrap();
        proc.process(claimed, ProcessingMode::OrphanDelete).await.unwrap();

        assert_eq!(plugin.removed.lock().unwrap(), vec![Reference::new("orphan")]);
    }

    #[tokio::test]
    async fn grace_once_spares_the_first_spoil_but_deletes_the_second() {
        // spec §8 scenario 4: cache holds `r` as a prior GOOD state; the
        // current run spoils it with GRACE_ONCE configured. The first spoil
        // after a good cache entry is spared; a spoil following an already-
        // bad cache entry is deleted.
        struct ForceStatePlugin {
            state: State,
        }

        #[async_trait]
        impl Committer for ForceStatePlugin {
            async fn upsert(&self, _reference: &Reference, _doc: &Document) -> Result<(), PluginError> {
                Ok(())
            }
            async fn remove(
                &self,
                _reference: &Reference,
                _metadata: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<(), PluginError> {
                Ok(())
            }
            async fn commit(&self) -> Result<(), PluginError> {
                Ok(())
            }
        }

        #[async_trait]
        impl CrawlerPlugin for ForceStatePlugin {
            async fn execute_importer_pipeline(
                &self,
                _current: &CrawlRecord,
                _cached: Option<&CrawlRecord>,
                _doc: &Document,
            ) -> Result<Option<ImporterResponse>, PluginError> {
                Ok(Some(ImporterResponse::success()))
            }

            async fn execute_committer_pipeline(
                &self,
                current: &mut CrawlRecord,
                _cached: Option<&CrawlRecord>,
                _doc: &Document,
            ) -> Result<(), PluginError> {
                current.state = Some(self.state);
                Ok(())
            }

            fn committer(&self) -> Option<&dyn Committer> {
                Some(self)
            }
        }

        struct AlwaysGrace;
        impl crawlkit_core::SpoiledPolicy for AlwaysGrace {
            fn disposition(&self, _reference: &Reference, _final_state: State) -> Option<Disposition> {
                Some(Disposition::GraceOnce)
            }
        }

        let dir = tempfile::tempdir().unwrap();

        // Run 1: establish a GOOD cached entry for `r`.
        {
            let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
            let plugin = Arc::new(ForceStatePlugin { state: State::New });
            let (tx, _rx) = broadcast::channel(16);
            let proc = ReferenceProcessor::new(plugin, store.clone(), None, Vec::new(), tx);
            store.queue(CrawlRecord::new(Reference::new("r"))).unwrap();
            let claimed = store.next_queued().unwrap().unwrap();
            proc.process(claimed, ProcessingMode::Normal).await.unwrap();
            store.close().await.unwrap();
        }

        // Run 2: spoil against the GOOD cache entry — GRACE_ONCE spares it.
        {
            let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
            let plugin = Arc::new(ForceStatePlugin { state: State::BadStatus });
            let (tx, _rx) = broadcast::channel(16);
            let mut rx = tx.subscribe();
            let policy: Arc<dyn crawlkit_core::SpoiledPolicy> = Arc::new(AlwaysGrace);
            let proc = ReferenceProcessor::new(plugin.clone(), store.clone(), Some(policy), Vec::new(), tx);
            store.queue(CrawlRecord::new(Reference::new("r"))).unwrap();
            let claimed = store.next_queued().unwrap().unwrap();
            proc.process(claimed, ProcessingMode::Normal).await.unwrap();

            let mut saw_remove = false;
            while let Ok(event) = rx.try_recv() {
                if matches!(event, EngineEvent::DocumentCommittedRemove { .. }) {
                    saw_remove = true;
                }
            }
            assert!(!saw_remove, "first spoil against a good cache entry must be spared");
            store.close().await.unwrap();
        }

        // Run 3: spoil again, now against a cache entry that is itself bad —
        // GRACE_ONCE degrades to DELETE.
        {
            let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
            let plugin = Arc::new(ForceStatePlugin { state: State::BadStatus });
            let (tx, _rx) = broadcast::channel(16);
            let mut rx = tx.subscribe();
            let policy: Arc<dyn crawlkit_core::SpoiledPolicy> = Arc::new(AlwaysGrace);
            let proc = ReferenceProcessor::new(plugin.clone(), store.clone(), Some(policy), Vec::new(), tx);
            store.queue(CrawlRecord::new(Reference::new("r"))).unwrap();
            let claimed = store.next_queued().unwrap().unwrap();
            proc.process(claimed, ProcessingMode::Normal).await.unwrap();

            let mut saw_remove = false;
            while let Ok(event) = rx.try_recv() {
                if matches!(event, EngineEvent::DocumentCommittedRemove { .. }) {
                    saw_remove = true;
                }
            }
            assert!(saw_remove, "third spoil against an already-bad cache entry must delete");
        }
    }

    #[tokio::test]
    async fn stream_factory_stream_is_attached_and_released_by_finalize() {
        use crawlkit_core::StreamFactory;

        struct CountingStreamFactory {
            opened: StdMutex<u32>,
        }

        impl StreamFactory for CountingStreamFactory {
            fn open(&self, _reference: &Reference) -> std::io::Result<Box<dyn std::io::Read + Send>> {
                *self.opened.lock().unwrap() += 1;
                Ok(Box::new(std::io::Cursor::new(b"payload".to_vec())))
            }
        }

        struct StreamingPlugin {
            factory: CountingStreamFactory,
            saw_stream: StdMutex<bool>,
        }

        #[async_trait]
        impl Committer for StreamingPlugin {
            async fn upsert(&self, _reference: &Reference, _doc: &Document) -> Result<(), PluginError> {
                Ok(())
            }
            async fn remove(
                &self,
                _reference: &Reference,
                _metadata: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<(), PluginError> {
                Ok(())
            }
            async fn commit(&self) -> Result<(), PluginError> {
                Ok(())
            }
        }

        #[async_trait]
        impl CrawlerPlugin for StreamingPlugin {
            async fn execute_importer_pipeline(
                &self,
                _current: &CrawlRecord,
                _cached: Option<&CrawlRecord>,
                doc: &Document,
            ) -> Result<Option<ImporterResponse>, PluginError> {
                *self.saw_stream.lock().unwrap() = doc.take_stream().is_some();
                Ok(Some(ImporterResponse::success()))
            }

            async fn execute_committer_pipeline(
                &self,
                current: &mut CrawlRecord,
                _cached: Option<&CrawlRecord>,
                _doc: &Document,
            ) -> Result<(), PluginError> {
                current.state = Some(State::New);
                Ok(())
            }

            fn committer(&self) -> Option<&dyn Committer> {
                Some(self)
            }

            fn stream_factory(&self) -> Option<&dyn StreamFactory> {
                Some(&self.factory)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
        let plugin = Arc::new(StreamingPlugin {
            factory: CountingStreamFactory { opened: StdMutex::new(0) },
            saw_stream: StdMutex::new(false),
        });
        let (tx, _rx) = broadcast::channel(16);
        let proc = ReferenceProcessor::new(plugin.clone(), store.clone(), None, Vec::new(), tx);

        store.queue(CrawlRecord::new(Reference::new("a"))).unwrap();
        let claimed = store.next_queued().unwrap().unwrap();
        proc.process(claimed, ProcessingMode::Normal).await.unwrap();

        assert_eq!(*plugin.factory.opened.lock().unwrap(), 1);
        assert!(*plugin.saw_stream.lock().unwrap(), "importer must observe the attached stream");
    }

    #[tokio::test]
    async fn embedded_children_each_get_their_own_processed_row() {
        struct ParentPlugin;

        #[async_trait]
        impl Committer for ParentPlugin {
            async fn upsert(&self, _reference: &Reference, _doc: &Document) -> Result<(), PluginError> {
                Ok(())
            }
            async fn remove(
                &self,
                _reference: &Reference,
                _metadata: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<(), PluginError> {
                Ok(())
            }
            async fn commit(&self) -> Result<(), PluginError> {
                Ok(())
            }
        }

        #[async_trait]
        impl CrawlerPlugin for ParentPlugin {
            async fn execute_importer_pipeline(
                &self,
                current: &CrawlRecord,
                _cached: Option<&CrawlRecord>,
                _doc: &Document,
            ) -> Result<Option<ImporterResponse>, PluginError> {
                if current.reference.as_str() == "parent" {
                    let mut resp = ImporterResponse::success();
                    resp.children.push(crawlkit_core::EmbeddedResponse {
                        reference: Reference::new("c1"),
                        response: ImporterResponse::success(),
                    });
                    resp.children.push(crawlkit_core::EmbeddedResponse {
                        reference: Reference::new("c2"),
                        response: ImporterResponse::success(),
                    });
                    Ok(Some(resp))
                } else {
                    Ok(Some(ImporterResponse::success()))
                }
            }

            async fn execute_committer_pipeline(
                &self,
                current: &mut CrawlRecord,
                _cached: Option<&CrawlRecord>,
                _doc: &Document,
            ) -> Result<(), PluginError> {
                current.state = Some(State::New);
                Ok(())
            }

            fn committer(&self) -> Option<&dyn Committer> {
                Some(self)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CrawlDataStore::open(dir.path(), "t", false).await.unwrap());
        let plugin = Arc::new(ParentPlugin);
        let (tx, _rx) = broadcast::channel(16);
        let proc = ReferenceProcessor::new(plugin, store.clone(), None, Vec::new(), tx);

        store.queue(CrawlRecord::new(Reference::new("parent"))).unwrap();
        let claimed = store.next_queued().unwrap().unwrap();
        proc.process(claimed, ProcessingMode::Normal).await.unwrap();

        assert_eq!(store.processed_count(), 3);
    }
}
