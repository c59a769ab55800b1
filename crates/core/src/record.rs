//! Record: the raw persisted field mapping of one entity
//!
//! A record is an ordered map of fields plus storage metadata (`__META`).
//! The metadata is filled in by storage on read and is never persisted;
//! record equality ignores it.

use crate::key::StorageKey;
use crate::value::{self, Map, Value};
use serde::{Deserialize, Serialize};

/// Reserved field name under which storage metadata is exposed
pub const META_FIELD: &str = "__META";

/// Reserved field name for per-record load errors
pub const ERROR_FIELD: &str = "__ERROR";

/// Storage metadata attached to a record read from a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Canonical key the record was read from
    pub storage_key: StorageKey,
    /// Modification time in microseconds since the Unix epoch
    pub timestamp: i64,
    /// xxh3 hex digest of the persisted bytes
    pub checksum: String,
}

/// Raw field mapping for one entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map,
    #[serde(skip)]
    meta: Option<RecordMeta>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Record {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Record over the given fields
    ///
    /// Reserved fields (`__META`, `__ERROR`) are dropped.
    pub fn from_map(mut fields: Map) -> Self {
        fields.remove(META_FIELD);
        fields.remove(ERROR_FIELD);
        Record { fields, meta: None }
    }

    /// Builder-style field insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Nested value by dot path
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        value::get_path(&self.fields, path)
    }

    /// Mutable field value
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    /// Set a field, returning the previous value
    ///
    /// Writes to reserved field names are ignored.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let field = field.into();
        if field == META_FIELD || field == ERROR_FIELD {
            return None;
        }
        self.fields.insert(field, value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Whether a field is present
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow all fields
    pub fn fields(&self) -> &Map {
        &self.fields
    }

    /// Mutably borrow all fields
    pub fn fields_mut(&mut self) -> &mut Map {
        &mut self.fields
    }

    /// Consume into the field map
    pub fn into_fields(self) -> Map {
        self.fields
    }

    /// Shallow merge: fields in `other` overwrite fields here
    pub fn merge(&mut self, other: Map) {
        for (field, value) in other {
            self.insert(field, value);
        }
    }

    /// Storage metadata, present on records read from a backend
    pub fn meta(&self) -> Option<&RecordMeta> {
        self.meta.as_ref()
    }

    /// Attach storage metadata
    pub fn set_meta(&mut self, meta: RecordMeta) {
        self.meta = Some(meta);
    }

    /// Builder form of [`Record::set_meta`]
    pub fn with_meta(mut self, meta: RecordMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Detach storage metadata
    pub fn take_meta(&mut self) -> Option<RecordMeta> {
        self.meta.take()
    }
}

impl From<Map> for Record {
    fn from(fields: Map) -> Self {
        Record::from_map(fields)
    }
}
