//! Index: ordered key → metadata mapping for one collection root
//!
//! The index lets collections list, order and filter records without
//! reading payloads. Storage is the source of truth; the persisted blob is
//! only a cache:
//!
//! - **Fast path**: the blob's fingerprint matches a fresh storage scan
//! - **Reconcile**: the blob is readable but stale; unchanged entries are
//!   kept, changed and new keys are re-indexed, missing keys are dropped
//! - **Rebuild**: no blob, a corrupt blob, or a format change
//!
//! Mutations are journaled until [`Index::save`], which reloads the blob,
//! replays the journal on top when another process saved in between, and
//! atomically replaces the file.

use crate::backend::RecordStorage;
use crate::blob::{read_index, write_index, IndexData};
use flexdb_core::{Error, IndexEntry, Result, StorageKey};
use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::Xxh3;

/// File name of the persisted index inside a collection root
pub const INDEX_FILE_NAME: &str = ".flex-index";

/// How [`Index::load`] obtained its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Persisted blob matched storage
    Fresh {
        /// Number of entries loaded
        entries: usize,
    },
    /// Persisted blob was stale and was patched from storage
    Reconciled {
        /// Keys found in storage but not in the blob
        added: usize,
        /// Keys whose timestamp changed
        updated: usize,
        /// Keys in the blob that are gone from storage
        removed: usize,
    },
    /// Entries were rebuilt from a full storage scan
    Rebuilt {
        /// Number of entries built
        entries: usize,
    },
}

/// Fingerprint of a set of (key, timestamp) pairs, independent of order
pub fn fingerprint_of<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let mut pairs: Vec<_> = pairs.into_iter().collect();
    pairs.sort_unstable();
    let mut hasher = Xxh3::new();
    for (key, timestamp) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(&timestamp.to_le_bytes());
    }
    format!("{:016x}", hasher.digest())
}

// ============================================================================
// Ordered entries
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Entries {
    map: HashMap<StorageKey, IndexEntry>,
    order: Vec<StorageKey>,
}

impl Entries {
    fn from_ordered(entries: Vec<IndexEntry>) -> Self {
        let mut out = Entries::default();
        for entry in entries {
            if !out.map.contains_key(&entry.key) {
                out.put(entry);
            }
        }
        out
    }

    fn put(&mut self, entry: IndexEntry) {
        if !self.map.contains_key(&entry.key) {
            self.order.push(entry.key.clone());
        }
        self.map.insert(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.map.remove(key)?;
        self.order.retain(|k| k.as_str() != key);
        Some(entry)
    }

    fn rename(&mut self, old: &str, new: StorageKey) -> bool {
        if self.map.contains_key(new.as_str()) {
            return false;
        }
        let Some(mut entry) = self.map.remove(old) else {
            return false;
        };
        if let Some(slot) = self.order.iter_mut().find(|k| k.as_str() == old) {
            *slot = new.clone();
        }
        entry.key = new.clone();
        self.map.insert(new, entry);
        true
    }

    fn apply(&mut self, change: &Pending) {
        match change {
            Pending::Put(entry) => self.put(entry.clone()),
            Pending::Remove(key) => {
                self.remove(key.as_str());
            }
            Pending::Rename { from, to } => {
                self.rename(from.as_str(), to.clone());
            }
        }
    }

    fn to_vec(&self) -> Vec<IndexEntry> {
        self.order
            .iter()
            .filter_map(|k| self.map.get(k).cloned())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Put(IndexEntry),
    Remove(StorageKey),
    Rename { from: StorageKey, to: StorageKey },
}

// ============================================================================
// Index
// ============================================================================

/// Ordered mapping from canonical key to [`IndexEntry`]
///
/// Not synchronized; owners wrap it in a lock.
#[derive(Debug)]
pub struct Index {
    path: Option<PathBuf>,
    tag_fields: Vec<String>,
    entries: Entries,
    pending: Vec<Pending>,
    synced_at: i64,
    revision: u64,
    fingerprint: OnceCell<String>,
}

impl Index {
    /// Index persisted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Index {
            path: Some(path.into()),
            tag_fields: Vec::new(),
            entries: Entries::default(),
            pending: Vec::new(),
            synced_at: 0,
            revision: 0,
            fingerprint: OnceCell::new(),
        }
    }

    /// Index persisted in the storage root as [`INDEX_FILE_NAME`]
    pub fn for_storage(storage: &dyn RecordStorage) -> Self {
        Self::new(storage.root().join(INDEX_FILE_NAME))
    }

    /// Index that is never persisted; `load` always rebuilds
    pub fn in_memory() -> Self {
        Index {
            path: None,
            ..Self::new(PathBuf::new())
        }
    }

    /// Record fields (dot paths) copied into entry tags
    pub fn with_tag_fields(mut self, fields: Vec<String>) -> Self {
        self.tag_fields = fields;
        self
    }

    /// Location of the persisted blob
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fields copied into entry tags
    pub fn tag_fields(&self) -> &[String] {
        &self.tag_fields
    }

    /// Counter bumped by every in-memory change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Fingerprint of the current (key, timestamp) state
    pub fn fingerprint(&self) -> &str {
        self.fingerprint.get_or_init(|| {
            fingerprint_of(
                self.entries
                    .map
                    .values()
                    .map(|e| (e.key.as_str(), e.timestamp)),
            )
        })
    }

    /// Whether mutations are waiting for [`Index::save`]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Entry for a canonical key
    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.map.get(key)
    }

    /// Whether a canonical key is indexed
    pub fn has(&self, key: &str) -> bool {
        self.entries.map.contains_key(key)
    }

    /// Canonical keys in index order
    pub fn keys(&self) -> &[StorageKey] {
        &self.entries.order
    }

    /// Entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.entries
            .order
            .iter()
            .filter_map(move |k| self.entries.map.get(k))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.order.len()
    }

    /// True when nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.order.is_empty()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or replace an entry; new keys go to the end
    pub fn put(&mut self, entry: IndexEntry) {
        self.pending.push(Pending::Put(entry.clone()));
        self.entries.put(entry);
        self.touch();
    }

    /// Remove an entry, returning it
    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let removed = self.entries.remove(key)?;
        self.pending.push(Pending::Remove(removed.key.clone()));
        self.touch();
        Some(removed)
    }

    /// Re-key an entry, keeping its position
    pub fn rename(&mut self, old_key: &str, new_key: StorageKey) -> Result<()> {
        if old_key == new_key.as_str() {
            return if self.has(old_key) {
                Ok(())
            } else {
                Err(Error::not_found(old_key))
            };
        }
        if !self.has(old_key) {
            return Err(Error::not_found(old_key));
        }
        if self.has(new_key.as_str()) {
            return Err(Error::conflict(new_key.into_string()));
        }
        self.pending.push(Pending::Rename {
            from: StorageKey::from_canonical(old_key),
            to: new_key.clone(),
        });
        self.entries.rename(old_key, new_key);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.fingerprint = OnceCell::new();
    }

    fn replace(&mut self, entries: Entries) {
        self.entries = entries;
        self.touch();
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Load entries, preferring a fresh persisted blob
    ///
    /// Storage I/O errors propagate. Problems with the blob never do: they
    /// are logged and the index is rebuilt from storage.
    pub fn load(&mut self, storage: &dyn RecordStorage) -> Result<LoadOutcome> {
        let scanned = scan(storage)?;
        let current = fingerprint_of(scanned.iter().map(|(k, t)| (k.as_str(), *t)));
        let persisted = self.read_persisted();
        self.pending.clear();

        let outcome = match persisted {
            Some(data) if data.fingerprint == current => {
                self.synced_at = data.created_at;
                self.replace(Entries::from_ordered(data.entries));
                debug!(target: "flexdb::index", root = %storage.root().display(), entries = self.len(), "Loaded index from disk");
                return Ok(LoadOutcome::Fresh {
                    entries: self.len(),
                });
            }
            Some(data) => {
                self.synced_at = data.created_at;
                let (entries, outcome) = self.reconcile(storage, data.entries, &scanned)?;
                self.replace(entries);
                if let LoadOutcome::Reconciled {
                    added,
                    updated,
                    removed,
                } = outcome
                {
                    info!(
                        target: "flexdb::index",
                        root = %storage.root().display(),
                        entries = self.len(),
                        added,
                        updated,
                        removed,
                        "Index reconciled with storage"
                    );
                }
                outcome
            }
            None => {
                let entries = self.rebuild(storage, &scanned)?;
                self.replace(entries);
                info!(target: "flexdb::index", root = %storage.root().display(), entries = self.len(), "Index rebuilt from storage");
                LoadOutcome::Rebuilt {
                    entries: self.len(),
                }
            }
        };

        if let Err(e) = self.persist() {
            warn!(target: "flexdb::index", error = %e, "Failed to persist index, continuing with in-memory state");
        }
        Ok(outcome)
    }

    /// Persist the current entries as a single blob
    ///
    /// If another process saved after our last load or save, its blob is
    /// taken as the base and this index's journaled mutations are replayed
    /// on top before writing.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            self.pending.clear();
            return Ok(());
        };

        if let Ok(disk) = read_index(&path) {
            if disk.created_at > self.synced_at && disk.tag_fields == self.tag_fields {
                let mut merged = Entries::from_ordered(disk.entries);
                for change in &self.pending {
                    merged.apply(change);
                }
                debug!(target: "flexdb::index", path = %path.display(), replayed = self.pending.len(), "Merged index with concurrent writer");
                self.replace(merged);
            }
        }

        self.persist()?;
        self.pending.clear();
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let created_at = chrono::Utc::now()
            .timestamp_micros()
            .max(self.synced_at + 1);
        let data = IndexData {
            fingerprint: self.fingerprint().to_string(),
            created_at,
            tag_fields: self.tag_fields.clone(),
            entries: self.entries.to_vec(),
        };
        write_index(&path, &data)?;
        self.synced_at = created_at;
        Ok(())
    }

    fn read_persisted(&self) -> Option<IndexData> {
        let path = self.path.as_deref()?;
        match read_index(path) {
            Ok(data) if data.tag_fields == self.tag_fields => Some(data),
            Ok(_) => {
                info!(target: "flexdb::index", path = %path.display(), "Index tag fields changed, rebuilding");
                None
            }
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(target: "flexdb::index", path = %path.display(), error = %e, "Persisted index unreadable, rebuilding from storage");
                None
            }
        }
    }

    fn rebuild(&self, storage: &dyn RecordStorage, scanned: &[(StorageKey, i64)]) -> Result<Entries> {
        let mut entries = Entries::default();
        for (key, timestamp) in scanned {
            if let Some(entry) = self.build_entry(storage, key.clone(), *timestamp)? {
                entries.put(entry);
            }
        }
        Ok(entries)
    }

    fn reconcile(
        &self,
        storage: &dyn RecordStorage,
        old: Vec<IndexEntry>,
        scanned: &[(StorageKey, i64)],
    ) -> Result<(Entries, LoadOutcome)> {
        let current: HashMap<&str, i64> = scanned.iter().map(|(k, t)| (k.as_str(), *t)).collect();
        let mut seen: HashSet<StorageKey> = HashSet::with_capacity(old.len());
        let mut entries = Entries::default();
        let (mut added, mut updated, mut removed) = (0, 0, 0);

        for entry in old {
            if !seen.insert(entry.key.clone()) {
                continue;
            }
            match current.get(entry.key.as_str()) {
                None => removed += 1,
                Some(&timestamp) if timestamp == entry.timestamp => entries.put(entry),
                Some(&timestamp) => match self.build_entry(storage, entry.key, timestamp)? {
                    Some(fresh) => {
                        entries.put(fresh);
                        updated += 1;
                    }
                    None => removed += 1,
                },
            }
        }

        for (key, timestamp) in scanned {
            if seen.contains(key) {
                continue;
            }
            if let Some(entry) = self.build_entry(storage, key.clone(), *timestamp)? {
                entries.put(entry);
                added += 1;
            }
        }

        Ok((
            entries,
            LoadOutcome::Reconciled {
                added,
                updated,
                removed,
            },
        ))
    }

    /// Entry for one stored key; reads the payload only when tags are needed
    fn build_entry(
        &self,
        storage: &dyn RecordStorage,
        key: StorageKey,
        timestamp: i64,
    ) -> Result<Option<IndexEntry>> {
        if self.tag_fields.is_empty() {
            return Ok(Some(IndexEntry::new(key, timestamp)));
        }
        match storage.read(key.as_str()) {
            Ok(record) => {
                let timestamp = record.meta().map_or(timestamp, |m| m.timestamp);
                Ok(Some(
                    IndexEntry::new(key, timestamp).with_tags_from(&record, &self.tag_fields),
                ))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(Error::Serialization(msg)) => {
                warn!(target: "flexdb::index", key = %key, error = %msg, "Broken record, indexing without tags");
                Ok(Some(IndexEntry::new(key, timestamp)))
            }
            Err(e) => Err(e),
        }
    }
}

/// (key, timestamp) for every stored record, from a fresh scan
fn scan(storage: &dyn RecordStorage) -> Result<Vec<(StorageKey, i64)>> {
    let mut out = Vec::new();
    for key in storage.list_keys()? {
        if let Some(timestamp) = storage.stat(key.as_str())? {
            out.push((key, timestamp));
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================
