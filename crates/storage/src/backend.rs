//! RecordStorage: key → record persistence contract
//!
//! Every method takes raw keys and normalizes them with the backend's
//! [`KeyNormalizer`] before touching the filesystem, so raw keys that
//! normalize equally address the same record.
//!
//! Semantics shared by all backends:
//! - `read` of an absent key is `Error::NotFound`
//! - `write` creates or overwrites atomically (temp file + rename)
//! - `rename` onto an existing key is `Error::Conflict`
//! - `delete` of an absent key is a no-op
//! - `list_keys` rescans the backing directory on every call

use crate::format::Formatter;
use crate::transform::{RowPipeline, RowTransform};
use flexdb_core::{xxh3_hex, KeyNormalizer, Record, RecordMeta, Result, StorageKey};
use std::path::{Path, PathBuf};

/// Sequence of canonical keys produced by a storage scan
pub type KeyIter<'a> = Box<dyn Iterator<Item = StorageKey> + 'a>;

/// Persistence backend for one object type
pub trait RecordStorage: Send + Sync {
    /// Backend name used in logs and configuration (`file`, `folder`)
    fn kind(&self) -> &'static str;

    /// Directory holding all records of this backend
    fn root(&self) -> &Path;

    /// Key normalization policy
    fn normalizer(&self) -> &KeyNormalizer;

    /// Whether a record exists; invalid keys never exist
    fn exists(&self, key: &str) -> bool;

    /// Read a record with its storage metadata
    fn read(&self, key: &str) -> Result<Record>;

    /// Create or overwrite a record; returns the canonical key
    fn write(&self, key: &str, record: Record) -> Result<StorageKey>;

    /// Move a record (and its media) to a new key
    fn rename(&self, old_key: &str, new_key: &str) -> Result<StorageKey>;

    /// Remove a record (and its media); absent keys are ignored
    fn delete(&self, key: &str) -> Result<()>;

    /// Directory for attached files, `None` when the backend has no media
    fn media_path(&self, key: &str) -> Option<PathBuf>;

    /// Path of the file holding the record payload
    fn storage_path(&self, key: &str) -> Option<PathBuf>;

    /// Modification timestamp without reading the payload
    fn stat(&self, key: &str) -> Result<Option<i64>>;

    /// All stored keys, sorted, from a fresh scan
    fn list_keys(&self) -> Result<KeyIter<'_>>;

    /// Transform applied to every record before it is written
    fn prepare_row(&self, row: Record) -> Record;
}

/// Settings shared by the filesystem backends
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Payload encoding
    pub formatter: Formatter,
    /// Key normalization policy
    pub normalizer: KeyNormalizer,
    /// Row preparation steps
    pub pipeline: RowPipeline,
}

impl BackendOptions {
    /// Default options: JSON, case folding, no transforms
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style formatter
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Builder-style normalizer
    pub fn with_normalizer(mut self, normalizer: KeyNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Append a row preparation step
    pub fn with_transform(mut self, step: impl RowTransform + 'static) -> Self {
        self.pipeline = self.pipeline.then(step);
        self
    }

    /// Encode a record after running the pipeline
    pub(crate) fn encode(&self, record: Record) -> Result<Vec<u8>> {
        let prepared = self.pipeline.prepare(record);
        self.formatter.encode(&prepared)
    }

    /// Decode a payload and attach metadata
    pub(crate) fn decode(&self, key: StorageKey, bytes: &[u8], timestamp: i64) -> Result<Record> {
        let record = self.formatter.decode(bytes)?;
        Ok(record.with_meta(RecordMeta {
            storage_key: key,
            timestamp,
            checksum: xxh3_hex(bytes),
        }))
    }
}
