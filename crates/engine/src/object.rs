//! FlexObject: one record in memory
//!
//! An object holds a copy of its record, its identity and a weak handle to
//! its directory. Field setters only touch the copy and mark it dirty;
//! nothing reaches storage until [`FlexObject::save`].
//!
//! Relationship fields store identifiers. Reading a relationship resolves
//! them through the directory's resolver and memoizes the result on this
//! instance until the field is set again.

use crate::access::{Access, CRUD_RULES};
use crate::collection::FlexCollection;
use crate::config::RelationshipConfig;
use crate::directory::FlexDirectory;
use crate::media::MediaCollection;
use crate::resolver::{identifiers_from_value, identifiers_to_value, Relationship};
use flexdb_core::{Error, Identifier, Map, Record, Result, StorageKey, ValidationErrors, Value, TEMPORARY_KEY_MARKER};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
enum Resolved {
    One(Option<Box<FlexObject>>),
    Many(FlexCollection),
}

/// In-memory view of one record
#[derive(Debug, Clone)]
pub struct FlexObject {
    kind: String,
    key: Option<StorageKey>,
    temporary_id: String,
    data: Record,
    directory: Weak<FlexDirectory>,
    dirty: bool,
    deleted: bool,
    changed: BTreeSet<String>,
    relations: HashMap<String, Resolved>,
}

impl FlexObject {
    pub(crate) fn loaded(directory: &Arc<FlexDirectory>, key: StorageKey, data: Record) -> Self {
        Self::build(directory, Some(key), data, false)
    }

    pub(crate) fn unsaved(directory: &Arc<FlexDirectory>, key: Option<StorageKey>, data: Record) -> Self {
        Self::build(directory, key, data, true)
    }

    fn build(directory: &Arc<FlexDirectory>, key: Option<StorageKey>, data: Record, dirty: bool) -> Self {
        let temporary_id = format!("{}{}", TEMPORARY_KEY_MARKER, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        FlexObject {
            kind: directory.kind().to_string(),
            key,
            temporary_id,
            data,
            directory: Arc::downgrade(directory),
            dirty,
            deleted: false,
            changed: BTreeSet::new(),
            relations: HashMap::new(),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// `(type, id)` handle; unsaved objects without a key get a temporary id
    pub fn id(&self) -> Identifier {
        Identifier::new(&self.kind, self.id_str())
    }

    /// Object type
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Storage key, `None` until the first save of a keyless object
    pub fn key(&self) -> Option<&StorageKey> {
        self.key.as_ref()
    }

    /// Cache key unique across types: `type.obj:key`
    pub fn flex_key(&self) -> String {
        format!("{}.obj:{}", self.kind, self.id_str())
    }

    /// Whether the record is currently stored
    pub fn exists(&self) -> bool {
        if self.deleted {
            return false;
        }
        match (&self.key, self.directory.upgrade()) {
            (Some(key), Some(directory)) => directory.storage().exists(key.as_str()),
            _ => false,
        }
    }

    /// Modification time of the loaded record in microseconds
    pub fn timestamp(&self) -> Option<i64> {
        self.data.meta().map(|meta| meta.timestamp)
    }

    /// Unsaved changes are present
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The record was deleted through this instance
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Fields set or unset since the last load or save
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.changed.iter().map(String::as_str)
    }

    fn id_str(&self) -> &str {
        self.key
            .as_ref()
            .map_or(self.temporary_id.as_str(), StorageKey::as_str)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Raw record
    pub fn data(&self) -> &Record {
        &self.data
    }

    /// Top-level field
    pub fn get(&self, field: &str) -> Result<Option<&Value>> {
        self.ensure_live()?;
        Ok(self.data.get(field))
    }

    /// Nested field by dot path (`profile.address.city`)
    pub fn get_path(&self, path: &str) -> Result<Option<&Value>> {
        self.ensure_live()?;
        Ok(self.data.get_path(path))
    }

    /// Set a top-level field; marks the object dirty when the value changes
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<&mut Self> {
        self.ensure_live()?;
        let value = value.into();
        self.relations.remove(field);
        if self.data.get(field) != Some(&value) {
            self.data.insert(field, value);
            self.mark_changed(field);
        }
        Ok(self)
    }

    /// Remove a top-level field
    pub fn unset(&mut self, field: &str) -> Result<&mut Self> {
        self.ensure_live()?;
        self.relations.remove(field);
        if self.data.remove(field).is_some() {
            self.mark_changed(field);
        }
        Ok(self)
    }

    /// Set every field of `data`
    pub fn update(&mut self, data: Map) -> Result<&mut Self> {
        for (field, value) in data {
            self.set(&field, value)?;
        }
        Ok(self)
    }

    fn mark_changed(&mut self, field: &str) {
        self.dirty = true;
        self.changed.insert(field.to_string());
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Validate and write the record, then update the index
    ///
    /// On error nothing is written and the object keeps its changes. Failing
    /// `after_save` listeners are logged and do not fail the save.
    pub fn save(&mut self) -> Result<()> {
        self.ensure_live()?;
        let directory = self.directory()?;
        let (key, stored) = directory.store(self.key.as_ref(), self.data.clone())?;
        self.key = Some(key);
        self.data = stored;
        self.dirty = false;
        self.changed.clear();
        self.relations.clear();
        Ok(())
    }

    /// Remove the record and its index entry
    ///
    /// The instance is stale afterwards: field access and saving fail.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_live()?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::InvalidOperation(format!("{} has never been saved", self.id())))?;
        self.directory()?.delete_record(&key, self.data.clone())?;
        self.deleted = true;
        self.relations.clear();
        Ok(())
    }

    /// Move the record to a new key
    pub fn rename(&mut self, new_key: &str) -> Result<()> {
        self.ensure_live()?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::InvalidOperation(format!("{} has never been saved", self.id())))?;
        let new = self.directory()?.rename(key.as_str(), new_key)?;
        if let Some(mut meta) = self.data.take_meta() {
            meta.storage_key = new.clone();
            self.data.set_meta(meta);
        }
        self.key = Some(new);
        Ok(())
    }

    /// Attached files
    pub fn media(&self) -> Result<MediaCollection> {
        self.ensure_live()?;
        let directory = self.directory()?;
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation(format!("{} has no media before it is saved", self.id())))?;

        if let Some(path) = directory.storage().media_path(key.as_str()) {
            return Ok(MediaCollection::per_record(self.id(), path, directory.data_file_name(key)));
        }
        match directory.media_root() {
            Some(root) => Ok(MediaCollection::shared(self.id(), root.clone())),
            None => Err(Error::InvalidOperation(format!(
                "type '{}' has no media location",
                self.kind
            ))),
        }
    }

    /// Decision of this object's ACL for `scope.action`
    pub fn authorize(&self, action: &str, scope: Option<&str>) -> Option<bool> {
        let field = self
            .directory
            .upgrade()
            .map_or_else(|| "access".to_string(), |d| d.config().access_field.clone());
        let acl = self.data.get_path(&field)?;
        Access::with_rules(acl, CRUD_RULES).authorize(action, scope)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Declared relationship field
    pub fn relationship(&self, name: &str) -> Result<Relationship> {
        let config = self.relationship_config(name)?;
        let identifiers = identifiers_from_value(self.data.get(name).unwrap_or(&Value::Null), &config.kind);
        Ok(Relationship::new(
            name,
            config,
            identifiers,
            self.changed.contains(name),
        ))
    }

    /// Every declared relationship, by field name
    pub fn relationships(&self) -> Result<Vec<Relationship>> {
        let directory = self.directory()?;
        directory
            .config()
            .relationships
            .keys()
            .map(|name| self.relationship(name))
            .collect()
    }

    /// Replace the identifiers of a relationship field
    pub fn set_relationship(&mut self, name: &str, identifiers: &[Identifier]) -> Result<&mut Self> {
        let config = self.relationship_config(name)?;
        self.set(name, identifiers_to_value(identifiers, config.is_to_one()))
    }

    /// Cardinality and type check of every declared relationship
    pub fn check_relationships(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();
        for relationship in self.relationships()? {
            match relationship.check() {
                Ok(()) => {}
                Err(Error::Validation(found)) => {
                    for e in found.errors() {
                        errors.add(e.field.clone(), e.message.clone());
                    }
                }
                Err(e) => return Err(e),
            }
        }
        errors.into_result()
    }

    /// First object referenced by a relationship, resolved once per instance
    pub fn related(&mut self, name: &str) -> Result<Option<FlexObject>> {
        self.ensure_live()?;
        if let Some(Resolved::One(object)) = self.relations.get(name) {
            return Ok(object.as_deref().cloned());
        }
        let relationship = self.relationship(name)?;
        let resolved = match relationship.identifiers().first() {
            Some(identifier) => self.directory()?.resolver().resolve(identifier)?,
            None => None,
        };
        self.relations
            .insert(name.to_string(), Resolved::One(resolved.clone().map(Box::new)));
        Ok(resolved)
    }

    /// Every object referenced by a relationship, resolved once per instance
    pub fn related_many(&mut self, name: &str) -> Result<FlexCollection> {
        self.ensure_live()?;
        if let Some(Resolved::Many(collection)) = self.relations.get(name) {
            return Ok(collection.clone());
        }
        let relationship = self.relationship(name)?;
        let collection = self
            .directory()?
            .resolver()
            .resolve_many(relationship.kind(), relationship.identifiers())?;
        self.relations
            .insert(name.to_string(), Resolved::Many(collection.clone()));
        Ok(collection)
    }

    fn relationship_config(&self, name: &str) -> Result<RelationshipConfig> {
        self.directory()?
            .config()
            .relationships
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidOperation(format!("'{}' is not a relationship of '{}'", name, self.kind))
            })
    }

    fn directory(&self) -> Result<Arc<FlexDirectory>> {
        self.directory
            .upgrade()
            .ok_or_else(|| Error::InvalidOperation(format!("directory '{}' is closed", self.kind)))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted {
            Err(Error::StaleObject(self.id()))
        } else {
            Ok(())
        }
    }
}
