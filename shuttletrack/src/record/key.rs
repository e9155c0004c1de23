//! Bus keys for the shared real-time store.
//!
//! The store rejects `.`, `#`, `$`, `/`, `[` and `]` in key segments, so a
//! human-chosen bus label is mapped onto a key by replacing each of those
//! characters with `_`. Two labels that differ only in forbidden characters
//! collide on the same key; that is an accepted limitation.

use std::fmt;

/// Root collection holding one record per bus.
pub const BUSES_PATH: &str = "buses";

/// Characters the store does not allow inside a key segment.
pub const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '/', '[', ']'];

/// Replacement for every forbidden character.
pub const KEY_REPLACEMENT: char = '_';

/// Map a raw bus label onto the store key charset.
///
/// Character count is preserved and the mapping is idempotent.
pub fn sanitize_key(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if FORBIDDEN_KEY_CHARS.contains(&c) {
                KEY_REPLACEMENT
            } else {
                c
            }
        })
        .collect()
}

/// A sanitized key identifying one bus under [`BUSES_PATH`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusKey(String);

impl BusKey {
    /// Build a key from a user-facing bus label.
    ///
    /// Returns `None` when the label is empty or only whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        if label.trim().is_empty() {
            return None;
        }
        Some(Self(sanitize_key(label)))
    }

    /// Wrap a child name read back from the store.
    ///
    /// Child names are already keys, so no sanitization is applied.
    pub fn from_store(child: impl Into<String>) -> Self {
        Self(child.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full store path of the record for this key (`buses/{key}`).
    pub fn path(&self) -> String {
        format!("{}/{}", BUSES_PATH, self.0)
    }
}

impl fmt::Display for BusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BusKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
