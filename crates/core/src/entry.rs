//! IndexEntry: per-key metadata held by an index

use crate::key::StorageKey;
use crate::record::Record;
use crate::value::{Map, Value};
use serde::{Deserialize, Serialize};

/// Lightweight metadata for one stored record
///
/// Enough to list, order and filter a collection without reading payloads:
/// the canonical key, the modification timestamp, and optional tags copied
/// from the record when it was indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Canonical key
    pub key: StorageKey,
    /// Modification time in microseconds since the Unix epoch
    pub timestamp: i64,
    /// Precomputed fields used for filtering and ordering
    #[serde(default)]
    pub tags: Map,
}

impl IndexEntry {
    /// Entry without tags
    pub fn new(key: StorageKey, timestamp: i64) -> Self {
        IndexEntry {
            key,
            timestamp,
            tags: Map::new(),
        }
    }

    /// Builder-style tag insert
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Copy the named fields (dot paths allowed) from a record into tags
    ///
    /// Missing fields are skipped, so `tag(f).is_none()` means "field absent".
    pub fn with_tags_from(mut self, record: &Record, fields: &[String]) -> Self {
        for field in fields {
            if let Some(value) = record.get_path(field) {
                self.tags.insert(field.clone(), value.clone());
            }
        }
        self
    }

    /// Tag value
    pub fn tag(&self, name: &str) -> Option<&Value> {
        self.tags.get(name)
    }
}
