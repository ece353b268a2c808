use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reference::Reference;

/// Terminal outcome of processing a single reference (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    New,
    Modified,
    Unmodified,
    Rejected,
    Error,
    BadStatus,
    NotFound,
    Deleted,
}

impl State {
    /// Whether this state represents freshly- or re-derived content.
    pub fn is_new_or_modified(self) -> bool {
        matches!(self, State::New | State::Modified)
    }

    /// Whether this state represents a successful ingest (spec glossary:
    /// "Good state").
    pub fn is_good_state(self) -> bool {
        matches!(self, State::New | State::Modified | State::Unmodified)
    }
}

/// The scheduler's own coordinate for a record (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Queued,
    Active,
    Processed,
    Cached,
}

/// Disposition of a spoiled (non-good, non-deleted) final state (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignore,
    Delete,
    GraceOnce,
}

/// The per-reference record (spec §3).
///
/// `extensions` stands in for "application-defined extension fields
/// (subclasses of the base record)": composition over the inheritance the
/// source implementation uses for the same purpose (spec §9 Design Note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub reference: Reference,
    pub parent_root_reference: Option<Reference>,
    #[serde(default)]
    pub is_root_parent: bool,
    /// Unset until the processor assigns a terminal outcome; `finalize`
    /// treats a still-`None` state as an implementation bug (spec §4.3 step 1).
    pub state: Option<State>,
    pub meta_checksum: Option<String>,
    pub content_checksum: Option<String>,
    pub content_type: Option<String>,
    pub crawl_date: DateTime<Utc>,
    pub stage: Stage,
    #[serde(default)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl CrawlRecord {
    /// A fresh record for `reference`, unstaged until `queue`/`processed`
    /// place it, with no terminal state yet.
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            parent_root_reference: None,
            is_root_parent: false,
            state: None,
            meta_checksum: None,
            content_checksum: None,
            content_type: None,
            crawl_date: Utc::now(),
            stage: Stage::Queued,
            extensions: serde_json::Map::new(),
        }
    }

    /// Null-preserving merge of `cached` into `self` (spec §4.3 step 3,
    /// §9 Design Note: an explicit field-wise merge, not bean reflection).
    ///
    /// Every field is copied from `cached` only where the corresponding
    /// field on `self` is currently absent/zero-valued. Fields that carry
    /// the scheduler's own bookkeeping (`reference`, `stage`, `state`,
    /// `crawl_date`) are never touched — only content fields are eligible.
    pub fn fill_from_cache(&mut self, cached: &CrawlRecord) {
        if self.parent_root_reference.is_none() {
            self.parent_root_reference = cached.parent_root_reference.clone();
        }
        if !self.is_root_parent {
            self.is_root_parent = cached.is_root_parent;
        }
        if self.meta_checksum.is_none() {
            self.meta_checksum = cached.meta_checksum.clone();
        }
        if self.content_checksum.is_none() {
            self.content_checksum = cached.content_checksum.clone();
        }
        if self.content_type.is_none() {
            self.content_type = cached.content_type.clone();
        }
        for (key, value) in &cached.extensions {
            self.extensions.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reference: &str) -> CrawlRecord {
        CrawlRecord::new(Reference::new(reference))
    }

    #[test]
    fn good_states_are_new_modified_unmodified() {
        assert!(State::New.is_good_state());
        assert!(State::Modified.is_good_state());
        assert!(State::Unmodified.is_good_state());
        assert!(!State::Rejected.is_good_state());
        assert!(!State::Error.is_good_state());
        assert!(!State::Deleted.is_good_state());
    }

    #[test]
    fn new_or_modified_excludes_unmodified() {
        assert!(State::New.is_new_or_modified());
        assert!(State::Modified.is_new_or_modified());
        assert!(!State::Unmodified.is_new_or_modified());
    }

    #[test]
    fn fill_from_cache_never_overwrites_present_fields() {
        let mut current = record("r1");
        current.content_type = Some("text/html".to_string());
        current.extensions.insert("title".into(), "current".into());

        let mut cached = record("r1");
        cached.content_type = Some("application/octet-stream".to_string());
        cached.content_checksum = Some("abc".to_string());
        cached.meta_checksum = Some("meta".to_string());
        cached.extensions.insert("title".into(), "cached".into());
        cached.extensions.insert("author".into(), "cached-author".into());

        current.fill_from_cache(&cached);

        // Present field is untouched (P6).
        assert_eq!(current.content_type.as_deref(), Some("text/html"));
        assert_eq!(current.extensions.get("title").unwrap(), "current");
        // Absent fields are filled in.
        assert_eq!(current.content_checksum.as_deref(), Some("abc"));
        assert_eq!(current.meta_checksum.as_deref(), Some("meta"));
        assert_eq!(current.extensions.get("author").unwrap(), "cached-author");
    }

    #[test]
    fn fill_from_cache_fills_zero_value_bool() {
        let mut current = record("r1");
        let mut cached = record("r1");
        cached.is_root_parent = true;

        current.fill_from_cache(&cached);
        assert!(current.is_root_parent);
    }
}
