use std::fmt;
use std::hash::{Hash, Hasher};

/// Default key-length cap enforced by [`Reference::store_key`] (spec §6).
pub const MAX_STORE_KEY_LEN: usize = 1024;

/// Opaque, non-empty identifier for a unit of crawl work.
///
/// Uniqueness is per crawler instance, not global. `Reference` wraps the raw
/// string rather than passing `String` around directly so the key-length
/// truncation rule has exactly one implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Wrap a raw reference string. The type itself stays a thin wrapper so
    /// plugins can construct one freely, including from an empty string; the
    /// non-empty invariant (spec §3: "opaque non-empty string") is enforced
    /// at the point a reference enters the store, by the engine's `queue` op.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The full, untruncated reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key used to address this reference in the store.
    ///
    /// References at or under [`MAX_STORE_KEY_LEN`] bytes are used verbatim.
    /// Longer references are truncated and suffixed with a hash of the full
    /// value so distinct long references sharing a prefix don't collide; the
    /// full reference is always recoverable through the side table the store
    /// keeps (§3, truncation rule).
    pub fn store_key(&self) -> String {
        if self.0.len() <= MAX_STORE_KEY_LEN {
            return self.0.clone();
        }

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        let suffix = format!("#{:016x}", hasher.finish());
        let keep = MAX_STORE_KEY_LEN - suffix.len();
        let mut truncated = String::with_capacity(MAX_STORE_KEY_LEN);
        // Truncate on a char boundary so we never split a multi-byte codepoint.
        let mut boundary = keep.min(self.0.len());
        while boundary > 0 && !self.0.is_char_boundary(boundary) {
            boundary -= 1;
        }
        truncated.push_str(&self.0[..boundary]);
        truncated.push_str(&suffix);
        truncated
    }

    /// Whether this reference needed truncation to fit the store key cap.
    pub fn is_truncated(&self) -> bool {
        self.0.len() > MAX_STORE_KEY_LEN
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
