//! File-per-record backend
//!
//! Layout: `{root}/{key}.{ext}`. Records have no media directory; callers
//! fall back to a shared media location.

use crate::atomic::{modified_micros, stat_micros, write_atomic};
use crate::backend::{BackendOptions, KeyIter, RecordStorage};
use crate::transform::RowTransform;
use flexdb_core::{Error, KeyNormalizer, Locator, Record, Result, StorageKey};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One flat file per record
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    options: BackendOptions,
}

impl FileBackend {
    /// Backend rooted at an already resolved directory
    pub fn new(root: impl Into<PathBuf>, options: BackendOptions) -> Self {
        FileBackend {
            root: root.into(),
            options,
        }
    }

    /// Backend rooted at a stream URI
    pub fn open(locator: &dyn Locator, uri: &str, options: BackendOptions) -> Result<Self> {
        Ok(Self::new(locator.resolve(uri)?, options))
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root
            .join(format!("{}.{}", key, self.options.formatter.extension()))
    }

    fn canonical(&self, key: &str) -> Result<StorageKey> {
        self.options.normalizer.canonical(key)
    }
}

impl RecordStorage for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn normalizer(&self) -> &KeyNormalizer {
        &self.options.normalizer
    }

    fn exists(&self, key: &str) -> bool {
        match self.canonical(key) {
            Ok(key) => self.path_for(&key).is_file(),
            Err(_) => false,
        }
    }

    fn read(&self, key: &str) -> Result<Record> {
        let key = self.canonical(key)?;
        let path = self.path_for(&key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(key.into_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let timestamp = modified_micros(&fs::metadata(&path)?)?;
        self.options.decode(key, &bytes, timestamp)
    }

    fn write(&self, key: &str, record: Record) -> Result<StorageKey> {
        let key = self.canonical(key)?;
        let bytes = self.options.encode(record)?;
        write_atomic(&self.path_for(&key), &bytes)?;
        debug!(target: "flexdb::storage", backend = "file", key = %key, bytes = bytes.len(), "Record written");
        Ok(key)
    }

    fn rename(&self, old_key: &str, new_key: &str) -> Result<StorageKey> {
        let old_key = self.canonical(old_key)?;
        let new_key = self.canonical(new_key)?;
        let old_path = self.path_for(&old_key);
        if !old_path.is_file() {
            return Err(Error::not_found(old_key.into_string()));
        }
        if old_key == new_key {
            return Ok(new_key);
        }
        let new_path = self.path_for(&new_key);
        if new_path.exists() {
            return Err(Error::conflict(new_key.into_string()));
        }
        fs::rename(&old_path, &new_path)?;
        debug!(target: "flexdb::storage", backend = "file", from = %old_key, to = %new_key, "Record renamed");
        Ok(new_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let Ok(key) = self.canonical(key) else {
            return Ok(());
        };
        match fs::remove_file(self.path_for(&key)) {
            Ok(()) => {
                debug!(target: "flexdb::storage", backend = "file", key = %key, "Record deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn media_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }

    fn storage_path(&self, key: &str) -> Option<PathBuf> {
        self.canonical(key).ok().map(|key| self.path_for(&key))
    }

    fn stat(&self, key: &str) -> Result<Option<i64>> {
        match self.canonical(key) {
            Ok(key) => Ok(stat_micros(&self.path_for(&key))?),
            Err(_) => Ok(None),
        }
    }

    fn list_keys(&self) -> Result<KeyIter<'_>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Box::new(std::iter::empty())),
            Err(e) => return Err(e.into()),
        };

        let ext = self.options.formatter.extension();
        let mut keys = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.canonical(stem) {
                Ok(key) if key.as_str() == stem => {
                    keys.insert(key);
                }
                _ => {
                    debug!(target: "flexdb::storage", backend = "file", name = stem, "Skipping non-canonical file name");
                }
            }
        }
        Ok(Box::new(keys.into_iter()))
    }

    fn prepare_row(&self, row: Record) -> Record {
        self.options.pipeline.prepare(row)
    }
}
