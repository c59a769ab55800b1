//! Storage keys and key normalization
//!
//! Every storage and index lookup goes through [`KeyNormalizer`] first, so
//! two raw keys that normalize equally always address the same record.
//! [`StorageKey`] is the canonical form; it can only be produced by a
//! normalizer (or by trusted code that already holds a canonical key).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Marker reserved for keys of objects that were never saved
pub const TEMPORARY_KEY_MARKER: &str = "@@";

const FORBIDDEN_KEY_CHARS: &[char] = &['/', '\\', '?', '*', ':', ';', '{', '}', '\n', '\r', '\0'];

/// Canonical storage key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a string that is already canonical
    ///
    /// Callers must guarantee the string is the output of the normalizer
    /// in use (keys read back from an index or listed from storage).
    pub fn from_canonical(key: impl Into<String>) -> Self {
        StorageKey(key.into())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StorageKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Maps raw user-facing keys to canonical storage keys
///
/// The default policy trims surrounding whitespace and lower-cases.
/// Case-sensitive mode only trims. Normalization is idempotent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNormalizer {
    case_sensitive: bool,
}

impl KeyNormalizer {
    /// Case-folding normalizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer that keeps case as given
    pub fn case_sensitive() -> Self {
        KeyNormalizer {
            case_sensitive: true,
        }
    }

    /// Pick the policy from a flag
    pub fn with_case_sensitive(case_sensitive: bool) -> Self {
        KeyNormalizer { case_sensitive }
    }

    /// Whether case folding is disabled
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Normalize without validating
    pub fn normalize(&self, raw: &str) -> StorageKey {
        let trimmed = raw.trim();
        if self.case_sensitive {
            StorageKey(trimmed.to_string())
        } else {
            StorageKey(trimmed.to_lowercase())
        }
    }

    /// Normalize and validate; the form used by storage backends
    pub fn canonical(&self, raw: &str) -> Result<StorageKey> {
        let key = self.normalize(raw);
        validate_key(key.as_str())?;
        Ok(key)
    }

    /// True when both raw keys address the same record
    pub fn same(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }
}

/// Check that a key can be used as a file or folder name
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with('.') {
        Some("key must not start with '.'")
    } else if key.contains(TEMPORARY_KEY_MARKER) {
        Some("key contains reserved '@@' marker")
    } else if key.contains(FORBIDDEN_KEY_CHARS) {
        Some("key contains a forbidden character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Fresh random key for a new record: 32 lowercase hex characters
pub fn generate_key() -> StorageKey {
    StorageKey(uuid::Uuid::new_v4().simple().to_string())
}
