//! Folder-per-record backend
//!
//! Layout: `{root}/{key}/item.{ext}`, or `{root}/{key[..2]}/{key}/item.{ext}`
//! when prefixed. Every other file in a record's folder is media owned by
//! that record; deleting or renaming the record takes its media along.

use crate::atomic::{modified_micros, stat_micros, write_atomic};
use crate::backend::{BackendOptions, KeyIter, RecordStorage};
use crate::transform::RowTransform;
use flexdb_core::{Error, KeyNormalizer, Locator, Record, Result, StorageKey};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default base name of the data file inside a record folder
pub const DEFAULT_DATA_FILE: &str = "item";

/// One directory per record
#[derive(Debug, Clone)]
pub struct FolderBackend {
    root: PathBuf,
    options: BackendOptions,
    data_file: String,
    prefixed: bool,
}

impl FolderBackend {
    /// Backend rooted at an already resolved directory
    pub fn new(root: impl Into<PathBuf>, options: BackendOptions) -> Self {
        FolderBackend {
            root: root.into(),
            options,
            data_file: DEFAULT_DATA_FILE.to_string(),
            prefixed: false,
        }
    }

    /// Backend rooted at a stream URI
    pub fn open(locator: &dyn Locator, uri: &str, options: BackendOptions) -> Result<Self> {
        Ok(Self::new(locator.resolve(uri)?, options))
    }

    /// Shard record folders under a two-character prefix directory
    pub fn with_prefixed(mut self, prefixed: bool) -> Self {
        self.prefixed = prefixed;
        self
    }

    /// Base name of the data file (without extension)
    pub fn with_data_file(mut self, name: impl Into<String>) -> Self {
        self.data_file = name.into();
        self
    }

    /// File name of the data file, extension included
    pub fn data_file_name(&self) -> String {
        format!("{}.{}", self.data_file, self.options.formatter.extension())
    }

    fn folder_for(&self, key: &StorageKey) -> PathBuf {
        if self.prefixed {
            let prefix: String = key.as_str().chars().take(2).collect();
            self.root.join(prefix).join(key.as_str())
        } else {
            self.root.join(key.as_str())
        }
    }

    fn data_path(&self, key: &StorageKey) -> PathBuf {
        self.folder_for(key).join(self.data_file_name())
    }

    fn canonical(&self, key: &str) -> Result<StorageKey> {
        self.options.normalizer.canonical(key)
    }

    /// Record folders directly below `dir` that hold a data file
    fn collect_records(&self, dir: &Path, keys: &mut BTreeSet<StorageKey>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let data_file = self.data_file_name();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().join(&data_file).is_file() {
                continue;
            }
            match self.canonical(&name) {
                Ok(key) if key.as_str() == name => {
                    keys.insert(key);
                }
                _ => {
                    debug!(target: "flexdb::storage", backend = "folder", name = %name, "Skipping non-canonical folder name");
                }
            }
        }
        Ok(())
    }
}

impl RecordStorage for FolderBackend {
    fn kind(&self) -> &'static str {
        "folder"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn normalizer(&self) -> &KeyNormalizer {
        &self.options.normalizer
    }

    fn exists(&self, key: &str) -> bool {
        match self.canonical(key) {
            Ok(key) => self.data_path(&key).is_file(),
            Err(_) => false,
        }
    }

    fn read(&self, key: &str) -> Result<Record> {
        let key = self.canonical(key)?;
        let path = self.data_path(&key);
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
        write_atomic(&self.data_path(&key), &bytes)?;
        debug!(target: "flexdb::storage", backend = "folder", key = %key, bytes = bytes.len(), "Record written");
        Ok(key)
    }

    fn rename(&self, old_key: &str, new_key: &str) -> Result<StorageKey> {
        let old_key = self.canonical(old_key)?;
        let new_key = self.canonical(new_key)?;
        if !self.data_path(&old_key).is_file() {
            return Err(Error::not_found(old_key.into_string()));
        }
        if old_key == new_key {
            return Ok(new_key);
        }
        let new_folder = self.folder_for(&new_key);
        if new_folder.exists() {
            return Err(Error::conflict(new_key.into_string()));
        }
        if let Some(parent) = new_folder.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.folder_for(&old_key), &new_folder)?;
        debug!(target: "flexdb::storage", backend = "folder", from = %old_key, to = %new_key, "Record renamed");
        Ok(new_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let Ok(key) = self.canonical(key) else {
            return Ok(());
        };
        match fs::remove_dir_all(self.folder_for(&key)) {
            Ok(()) => {
                debug!(target: "flexdb::storage", backend = "folder", key = %key, "Record folder deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn media_path(&self, key: &str) -> Option<PathBuf> {
        self.canonical(key).ok().map(|key| self.folder_for(&key))
    }

    fn storage_path(&self, key: &str) -> Option<PathBuf> {
        self.canonical(key).ok().map(|key| self.data_path(&key))
    }

    fn stat(&self, key: &str) -> Result<Option<i64>> {
        match self.canonical(key) {
            Ok(key) => Ok(stat_micros(&self.data_path(&key))?),
            Err(_) => Ok(None),
        }
    }

    fn list_keys(&self) -> Result<KeyIter<'_>> {
        let mut keys = BTreeSet::new();
        if self.prefixed {
            let entries = match fs::read_dir(&self.root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Box::new(std::iter::empty()))
                }
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry.file_type()?.is_dir() && !hidden {
                    self.collect_records(&entry.path(), &mut keys)?;
                }
            }
        } else {
            self.collect_records(&self.root, &mut keys)?;
        }
        Ok(Box::new(keys.into_iter()))
    }

    fn prepare_row(&self, row: Record) -> Record {
        self.options.pipeline.prepare(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn alice() -> Record {
        Record::new().with("name", "Alice")
    }

    #[test]
    fn test_write_creates_record_folder() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new());

        storage.write("Alice", alice()).unwrap();
        assert!(dir.path().join("alice/item.json").is_file());
        assert_eq!(storage.read("alice").unwrap(), alice());
    }

    #[test]
    fn test_media_path_is_record_folder() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new());

        storage.write("Alice", alice()).unwrap();
        let media = storage.media_path("Alice").unwrap();
        assert_eq!(media, dir.path().join("alice"));
        assert!(media.is_dir());
    }

    #[test]
    fn test_delete_removes_media() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new());
        storage.write("alice", alice()).unwrap();
        fs::write(dir.path().join("alice/avatar.png"), b"png").unwrap();

        storage.delete("alice").unwrap();
        assert!(!dir.path().join("alice").exists());
        storage.delete("alice").unwrap();
    }

    #[test]
    fn test_rename_moves_media() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new());
        storage.write("alice", alice()).unwrap();
        storage.write("bob", Record::new().with("name", "Bob")).unwrap();
        fs::write(dir.path().join("alice/avatar.png"), b"png").unwrap();

        assert!(matches!(storage.rename("alice", "bob"), Err(Error::Conflict { .. })));

        storage.rename("alice", "alicia").unwrap();
        assert!(dir.path().join("alicia/avatar.png").is_file());
        assert_eq!(storage.read("alicia").unwrap(), alice());
        assert!(!storage.exists("alice"));
    }

    #[test]
    fn test_list_keys_ignores_folders_without_data() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new());
        storage.write("bob", alice()).unwrap();
        storage.write("alice", alice()).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join(".flex-index"), b"x").unwrap();

        let keys: Vec<_> = storage.list_keys().unwrap().map(StorageKey::into_string).collect();
        assert_eq!(keys, vec!["alice", "bob"]);
    }

    #[test]
    fn test_prefixed_layout() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new()).with_prefixed(true);

        storage.write("alice", alice()).unwrap();
        storage.write("bob", alice()).unwrap();
        assert!(dir.path().join("al/alice/item.json").is_file());

        let keys: Vec<_> = storage.list_keys().unwrap().map(StorageKey::into_string).collect();
        assert_eq!(keys, vec!["alice", "bob"]);

        storage.rename("alice", "carol").unwrap();
        assert!(dir.path().join("ca/carol/item.json").is_file());
    }

    #[test]
    fn test_custom_data_file() {
        let dir = TempDir::new().unwrap();
        let storage = FolderBackend::new(dir.path(), BackendOptions::new()).with_data_file("user");
        storage.write("alice", alice()).unwrap();
        assert!(dir.path().join("alice/user.json").is_file());
        assert_eq!(
            storage.storage_path("alice").unwrap(),
            dir.path().join("alice/user.json")
        );
    }
}
