//! FlexDirectory: one object type bound to its storage and index
//!
//! A directory owns the backend, the index, the hydration cache and the
//! method cache for one type. Objects and collections never write to
//! storage themselves; they go through the directory so the write order is
//! always the same:
//!
//! 1. `before_save` listeners run and may change the data
//! 2. the blueprint validates the data (errors leave everything untouched)
//! 3. the backend writes the record atomically
//! 4. the index entry is updated and the caches are dropped
//! 5. `after_save` listeners run; their failures are logged, the save stands
//!
//! A crash between 3 and 4 leaves a record the index does not know about;
//! the next [`Index::load`] reconciles it from storage.

use crate::cache::{CacheStats, MethodCache};
use crate::collection::FlexCollection;
use crate::config::{DirectoryConfig, StorageKind};
use crate::events::{self, EventBus, ObjectEvent};
use crate::object::FlexObject;
use crate::resolver::{detached_lookup, CollectionLookup, RelationshipResolver};
use flexdb_core::{
    generate_key, AcceptAll, Blueprint, Error, Identifier, IndexEntry, KeyNormalizer, Locator, Map,
    Record, Result, StorageKey, Value,
};
use flexdb_storage::{
    BackendOptions, FileBackend, FolderBackend, Index, LoadOutcome, RecordStorage, RelocateField,
    StripFields,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Storage, index and caches for one object type
pub struct FlexDirectory {
    kind: String,
    config: DirectoryConfig,
    storage: Box<dyn RecordStorage>,
    index: Mutex<Index>,
    blueprint: RwLock<Arc<dyn Blueprint>>,
    events: Arc<EventBus>,
    lookup: Weak<dyn CollectionLookup>,
    media_root: Option<PathBuf>,
    records: Mutex<HashMap<StorageKey, Record>>,
    methods: MethodCache,
}

impl fmt::Debug for FlexDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexDirectory")
            .field("kind", &self.kind)
            .field("storage", &self.storage.kind())
            .field("root", &self.storage.root())
            .field("entries", &self.index.lock().len())
            .finish()
    }
}

impl FlexDirectory {
    /// Standalone directory: private event bus, no relationship lookup
    pub fn open(kind: impl Into<String>, config: DirectoryConfig, locator: &dyn Locator) -> Result<Arc<Self>> {
        let storage = build_storage(&config, locator)?;
        let media_root = resolve_media_root(&config, locator)?;
        Self::assemble(
            kind.into(),
            config,
            storage,
            media_root,
            Arc::new(EventBus::new()),
            detached_lookup(),
        )
    }

    /// Directory over a caller-supplied backend
    pub fn with_storage(
        kind: impl Into<String>,
        config: DirectoryConfig,
        storage: Box<dyn RecordStorage>,
    ) -> Result<Arc<Self>> {
        Self::assemble(
            kind.into(),
            config,
            storage,
            None,
            Arc::new(EventBus::new()),
            detached_lookup(),
        )
    }

    pub(crate) fn open_in(
        kind: String,
        config: DirectoryConfig,
        storage: Option<Box<dyn RecordStorage>>,
        locator: &dyn Locator,
        events: Arc<EventBus>,
        lookup: Weak<dyn CollectionLookup>,
    ) -> Result<Arc<Self>> {
        let storage = match storage {
            Some(storage) => storage,
            None => build_storage(&config, locator)?,
        };
        let media_root = resolve_media_root(&config, locator)?;
        Self::assemble(kind, config, storage, media_root, events, lookup)
    }

    fn assemble(
        kind: String,
        config: DirectoryConfig,
        storage: Box<dyn RecordStorage>,
        media_root: Option<PathBuf>,
        events: Arc<EventBus>,
        lookup: Weak<dyn CollectionLookup>,
    ) -> Result<Arc<Self>> {
        config.validate(&kind)?;
        let mut index = Index::for_storage(storage.as_ref()).with_tag_fields(config.index_fields.clone());
        let outcome = index.load(storage.as_ref())?;
        debug!(
            target: "flexdb::context",
            kind = %kind,
            backend = storage.kind(),
            root = %storage.root().display(),
            ?outcome,
            "Directory opened"
        );

        let blueprint: Arc<dyn Blueprint> = Arc::new(AcceptAll);
        Ok(Arc::new(FlexDirectory {
            kind,
            config,
            storage,
            index: Mutex::new(index),
            blueprint: RwLock::new(blueprint),
            events,
            lookup,
            media_root,
            records: Mutex::new(HashMap::new()),
            methods: MethodCache::new(),
        }))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Object type served by this directory
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Directory configuration
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Backend holding the records
    pub fn storage(&self) -> &dyn RecordStorage {
        self.storage.as_ref()
    }

    /// Key normalization policy of the backend
    pub fn normalizer(&self) -> &KeyNormalizer {
        self.storage.normalizer()
    }

    /// Bus receiving object events
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Replace the validator used on every save
    pub fn set_blueprint(&self, blueprint: impl Blueprint + 'static) {
        *self.blueprint.write() = Arc::new(blueprint);
    }

    /// Resolver for relationship fields of this type
    pub fn resolver(&self) -> RelationshipResolver {
        RelationshipResolver::new(self.lookup.clone())
    }

    /// Number of indexed records
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// True when nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Collection of every record of this type
    pub fn collection(self: &Arc<Self>) -> FlexCollection {
        FlexCollection::all(Arc::clone(self))
    }

    /// Object for a key, `None` when it is not indexed or the key is invalid
    pub fn object(self: &Arc<Self>, key: &str) -> Result<Option<FlexObject>> {
        match self.normalizer().canonical(key) {
            Ok(key) => self.hydrate(&key),
            Err(Error::InvalidKey { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// New unsaved object; a key is generated on first save
    pub fn create_object(self: &Arc<Self>, data: Record) -> FlexObject {
        FlexObject::unsaved(self, None, data)
    }

    /// New unsaved object with a chosen key
    pub fn create_object_with_key(self: &Arc<Self>, key: &str, data: Record) -> Result<FlexObject> {
        let key = self.normalizer().canonical(key)?;
        if self.storage.exists(key.as_str()) {
            return Err(Error::conflict(key.into_string()));
        }
        Ok(FlexObject::unsaved(self, Some(key), data))
    }

    /// Merge `data` into the record at `key`, creating it when missing, and save
    pub fn update(self: &Arc<Self>, key: &str, data: Map) -> Result<FlexObject> {
        let mut object = match self.object(key)? {
            Some(object) => object,
            None => self.create_object_with_key(key, Record::new())?,
        };
        object.update(data)?;
        object.save()?;
        Ok(object)
    }

    /// Delete the record at `key`, returning the deleted object
    pub fn remove(self: &Arc<Self>, key: &str) -> Result<Option<FlexObject>> {
        match self.object(key)? {
            Some(mut object) => {
                object.delete()?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    /// Move a record to a new key, keeping its index position
    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<StorageKey> {
        let old = self.normalizer().canonical(old_key)?;
        let new = self.storage.rename(old.as_str(), new_key)?;
        if new == old {
            return Ok(new);
        }

        {
            let mut index = self.index.lock();
            match index.rename(old.as_str(), new.clone()) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    drop(index);
                    let entry = self.entry_for(&new)?;
                    self.index.lock().put(entry);
                }
                Err(e) => return Err(e),
            }
        }
        self.records.lock().remove(&old);
        self.methods.clear();

        let mut event = ObjectEvent::new(Identifier::new(&self.kind, new.as_str()), Record::new());
        event
            .attributes
            .insert("from".to_string(), Value::from(old.as_str()));
        self.events.notify(events::RENAMED, event);
        info!(target: "flexdb::object", kind = %self.kind, from = %old, to = %new, "Object renamed");
        Ok(new)
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Directory holding the payload file of `key`
    pub fn storage_folder(&self, key: &str) -> Option<PathBuf> {
        self.storage
            .storage_path(key)
            .and_then(|path| path.parent().map(PathBuf::from))
    }

    /// Media directory of `key`: the record folder, else the shared media root
    pub fn media_folder(&self, key: &str) -> Option<PathBuf> {
        self.storage
            .media_path(key)
            .or_else(|| self.media_root.clone())
    }

    /// Shared media root, when configured
    pub fn media_root(&self) -> Option<&PathBuf> {
        self.media_root.as_ref()
    }

    // ========================================================================
    // Index and caches
    // ========================================================================

    /// Reload the index from disk, reconciling with storage
    pub fn reload_index(&self) -> Result<LoadOutcome> {
        let outcome = self.index.lock().load(self.storage.as_ref())?;
        self.clear_cache();
        Ok(outcome)
    }

    /// Persist pending index changes
    pub fn flush(&self) -> Result<()> {
        let mut index = self.index.lock();
        if index.has_pending() {
            index.save()?;
            debug!(target: "flexdb::index", kind = %self.kind, entries = index.len(), "Index flushed");
        }
        Ok(())
    }

    /// Drop hydrated records and memoized method results
    pub fn clear_cache(&self) {
        self.records.lock().clear();
        self.methods.clear();
    }

    /// Method cache hit/miss counters
    pub fn cache_stats(&self) -> CacheStats {
        self.methods.stats()
    }

    /// Number of hydrated records held for reuse
    pub fn cached_records(&self) -> usize {
        self.records.lock().len()
    }

    pub(crate) fn with_index<R>(&self, f: impl FnOnce(&Index) -> R) -> R {
        f(&self.index.lock())
    }

    pub(crate) fn methods(&self) -> &MethodCache {
        &self.methods
    }

    pub(crate) fn data_file_name(&self, key: &StorageKey) -> Option<String> {
        if self.config.storage != StorageKind::Folder {
            return None;
        }
        self.storage
            .storage_path(key.as_str())
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    /// Object for an indexed key, reusing the hydrated record when current
    pub(crate) fn hydrate(self: &Arc<Self>, key: &StorageKey) -> Result<Option<FlexObject>> {
        let Some(timestamp) = self.with_index(|index| index.get(key.as_str()).map(|e| e.timestamp)) else {
            return Ok(None);
        };

        let cached = self.records.lock().get(key).cloned();
        if let Some(record) = cached {
            if record.meta().map(|m| m.timestamp) == Some(timestamp) {
                return Ok(Some(FlexObject::loaded(self, key.clone(), record)));
            }
        }

        let record = match self.storage.read(key.as_str()) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!(target: "flexdb::collection", kind = %self.kind, key = %key, "Indexed record vanished from storage");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.cache_record(key, &record);
        Ok(Some(FlexObject::loaded(self, key.clone(), record)))
    }

    /// Write a record and update the index; returns the stored form
    pub(crate) fn store(&self, key: Option<&StorageKey>, data: Record) -> Result<(StorageKey, Record)> {
        let key = match key {
            Some(key) => key.clone(),
            None => self.unused_key(),
        };
        let identifier = Identifier::new(&self.kind, key.as_str());

        let event = self
            .events
            .publish(events::BEFORE_SAVE, ObjectEvent::new(identifier.clone(), data))?;
        let blueprint = Arc::clone(&*self.blueprint.read());
        let validated = blueprint.validate(event.data)?;

        let key = self.storage.write(key.as_str(), validated)?;
        let stored = self.storage.read(key.as_str())?;
        let timestamp = stored.meta().map_or(0, |m| m.timestamp);
        let entry = IndexEntry::new(key.clone(), timestamp).with_tags_from(&stored, &self.config.index_fields);

        self.index.lock().put(entry);
        self.cache_record(&key, &stored);
        self.methods.clear();
        debug!(target: "flexdb::object", kind = %self.kind, key = %key, timestamp, "Object saved");

        self.events
            .notify(events::AFTER_SAVE, ObjectEvent::new(identifier, stored.clone()));
        Ok((key, stored))
    }

    /// Remove a record and its index entry
    pub(crate) fn delete_record(&self, key: &StorageKey, data: Record) -> Result<()> {
        let identifier = Identifier::new(&self.kind, key.as_str());
        let event = self
            .events
            .publish(events::BEFORE_DELETE, ObjectEvent::new(identifier, data))?;

        self.storage.delete(key.as_str())?;
        self.index.lock().remove(key.as_str());
        self.records.lock().remove(key);
        self.methods.clear();
        debug!(target: "flexdb::object", kind = %self.kind, key = %key, "Object deleted");

        self.events.notify(events::AFTER_DELETE, event);
        Ok(())
    }

    fn cache_record(&self, key: &StorageKey, record: &Record) {
        let capacity = self.config.record_cache;
        if capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        if records.len() >= capacity && !records.contains_key(key) {
            if let Some(evicted) = records.keys().next().cloned() {
                records.remove(&evicted);
            }
        }
        records.insert(key.clone(), record.clone());
    }

    fn unused_key(&self) -> StorageKey {
        loop {
            let key = generate_key();
            if !self.storage.exists(key.as_str()) && !self.with_index(|index| index.has(key.as_str())) {
                return key;
            }
        }
    }

    fn entry_for(&self, key: &StorageKey) -> Result<IndexEntry> {
        if self.config.index_fields.is_empty() {
            let timestamp = self.storage.stat(key.as_str())?.unwrap_or(0);
            return Ok(IndexEntry::new(key.clone(), timestamp));
        }
        let record = self.storage.read(key.as_str())?;
        let timestamp = record.meta().map_or(0, |m| m.timestamp);
        Ok(IndexEntry::new(key.clone(), timestamp).with_tags_from(&record, &self.config.index_fields))
    }
}

fn build_storage(config: &DirectoryConfig, locator: &dyn Locator) -> Result<Box<dyn RecordStorage>> {
    let mut options = BackendOptions::new()
        .with_formatter(config.format)
        .with_normalizer(KeyNormalizer::with_case_sensitive(config.case_sensitive));
    if !config.strip_fields.is_empty() {
        options = options.with_transform(StripFields::new(config.strip_fields.iter().cloned()));
    }
    for (field, section) in &config.relocate {
        options = options.with_transform(RelocateField::new(field.as_str(), section.as_str()));
    }

    Ok(match config.storage {
        StorageKind::File => Box::new(FileBackend::open(locator, &config.path, options)?),
        StorageKind::Folder => {
            let mut backend = FolderBackend::open(locator, &config.path, options)?.with_prefixed(config.prefixed);
            if let Some(name) = &config.data_file {
                backend = backend.with_data_file(name.as_str());
            }
            Box::new(backend)
        }
    })
}

fn resolve_media_root(config: &DirectoryConfig, locator: &dyn Locator) -> Result<Option<PathBuf>> {
    config
        .media_root
        .as_deref()
        .map(|uri| locator.resolve(uri))
        .transpose()
}
