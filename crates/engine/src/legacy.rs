//! Adapter exposing the old object method names
//!
//! Kept for callers written against the earlier object API. Every method
//! delegates to [`FlexObject`]; nothing here has behavior of its own.

use crate::object::FlexObject;
use flexdb_core::{Map, Result, Value};

/// Wrapper giving a [`FlexObject`] its previous method names
#[derive(Debug, Clone)]
pub struct LegacyObject {
    object: FlexObject,
}

impl LegacyObject {
    /// Wrap an object
    pub fn new(object: FlexObject) -> Self {
        LegacyObject { object }
    }

    /// Wrapped object
    pub fn inner(&self) -> &FlexObject {
        &self.object
    }

    /// Wrapped object, mutably
    pub fn inner_mut(&mut self) -> &mut FlexObject {
        &mut self.object
    }

    /// Unwrap
    pub fn into_inner(self) -> FlexObject {
        self.object
    }

    /// Nested value by dot path, or `default`
    pub fn value(&self, name: &str, default: Option<Value>) -> Result<Value> {
        Ok(self
            .object
            .get_path(name)?
            .cloned()
            .or(default)
            .unwrap_or(Value::Null))
    }

    /// Set `name` only when it has no value yet
    pub fn def(&mut self, name: &str, default: impl Into<Value>) -> Result<&mut Self> {
        let missing = self.object.get(name)?.map_or(true, Value::is_null);
        if missing {
            self.object.set(name, default)?;
        }
        Ok(self)
    }

    /// Remove `name`
    pub fn undef(&mut self, name: &str) -> Result<&mut Self> {
        self.object.unset(name)?;
        Ok(self)
    }

    /// Storage key as a string
    pub fn get_storage_key(&self) -> Option<String> {
        self.object.key().map(|k| k.as_str().to_string())
    }

    /// See [`FlexObject::flex_key`]
    pub fn get_flex_key(&self) -> String {
        self.object.flex_key()
    }

    /// Boolean authorization; no opinion counts as denied
    pub fn authorise(&self, action: &str, scope: Option<&str>) -> bool {
        self.object.authorize(action, scope).unwrap_or(false)
    }

    /// Number of top-level fields
    pub fn count(&self) -> usize {
        self.object.data().len()
    }

    /// Set every field of `data`
    pub fn merge(&mut self, data: Map) -> Result<&mut Self> {
        self.object.update(data)?;
        Ok(self)
    }
}

impl From<FlexObject> for LegacyObject {
    fn from(object: FlexObject) -> Self {
        LegacyObject::new(object)
    }
}
