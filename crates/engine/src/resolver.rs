//! Relationship resolution
//!
//! Relationship fields persist identifiers only. [`RelationshipResolver`]
//! turns them back into objects by asking a [`CollectionLookup`] for the
//! collection of the identifier's type. The resolver holds the lookup
//! weakly, so objects and collections never keep the context alive.

use crate::collection::FlexCollection;
use crate::config::RelationshipConfig;
use crate::object::FlexObject;
use flexdb_core::{Error, Identifier, Result, ValidationErrors, Value};
use std::sync::{Arc, Weak};

/// Type → collection registry consulted by the resolver
pub trait CollectionLookup: Send + Sync {
    /// Collection holding records of `kind`
    fn lookup_collection(&self, kind: &str) -> Option<FlexCollection>;
}

struct NoLookup;

impl CollectionLookup for NoLookup {
    fn lookup_collection(&self, _kind: &str) -> Option<FlexCollection> {
        None
    }
}

/// Lookup handle that never upgrades; used when no context owns a directory
pub(crate) fn detached_lookup() -> Weak<dyn CollectionLookup> {
    Weak::<NoLookup>::new()
}

/// Resolves identifiers through a weakly held lookup
#[derive(Clone)]
pub struct RelationshipResolver {
    lookup: Weak<dyn CollectionLookup>,
}

impl std::fmt::Debug for RelationshipResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipResolver")
            .field("attached", &(self.lookup.strong_count() > 0))
            .finish()
    }
}

impl RelationshipResolver {
    /// Resolver over a lookup
    pub fn new(lookup: Weak<dyn CollectionLookup>) -> Self {
        RelationshipResolver { lookup }
    }

    /// Resolver over a shared lookup
    pub fn from_arc<L: CollectionLookup + 'static>(lookup: &Arc<L>) -> Self {
        let weak: Weak<dyn CollectionLookup> = Arc::downgrade(lookup) as Weak<dyn CollectionLookup>;
        Self::new(weak)
    }

    /// Resolver that knows no types
    pub fn detached() -> Self {
        Self::new(detached_lookup())
    }

    /// Collection for a type
    pub fn collection(&self, kind: &str) -> Result<FlexCollection> {
        let lookup = self
            .lookup
            .upgrade()
            .ok_or_else(|| Error::UnknownType(kind.to_string()))?;
        lookup
            .lookup_collection(kind)
            .ok_or_else(|| Error::UnknownType(kind.to_string()))
    }

    /// Object for an identifier, `None` when it no longer exists
    pub fn resolve(&self, identifier: &Identifier) -> Result<Option<FlexObject>> {
        if identifier.is_media() {
            return Ok(None);
        }
        self.collection(identifier.kind())?.get(identifier.id())
    }

    /// Collection of the identified objects of `kind`, in the given order
    ///
    /// Dangling identifiers are dropped. Identifiers of another type are an
    /// error.
    pub fn resolve_many(&self, kind: &str, identifiers: &[Identifier]) -> Result<FlexCollection> {
        if let Some(other) = identifiers.iter().find(|id| id.kind() != kind) {
            return Err(Error::InvalidOperation(format!(
                "identifier {} is not of type '{}'",
                other, kind
            )));
        }
        let collection = self.collection(kind)?;
        Ok(collection.subset(identifiers.iter().map(Identifier::id)))
    }
}

/// Declared relationship field read from an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    name: String,
    config: RelationshipConfig,
    identifiers: Vec<Identifier>,
    modified: bool,
}

impl Relationship {
    pub(crate) fn new(
        name: impl Into<String>,
        config: RelationshipConfig,
        identifiers: Vec<Identifier>,
        modified: bool,
    ) -> Self {
        Relationship {
            name: name.into(),
            config,
            identifiers,
            modified,
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target type
    pub fn kind(&self) -> &str {
        &self.config.kind
    }

    /// Referenced identifiers in field order
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    /// Number of references
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// True when nothing is referenced
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Whether the field was changed since the object was loaded or saved
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Check cardinality bounds and target types
    pub fn check(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();
        let count = self.identifiers.len();
        if count < self.config.min {
            errors.add(
                &self.name,
                format!("needs at least {} item(s), has {}", self.config.min, count),
            );
        }
        if let Some(max) = self.config.max {
            if count > max {
                errors.add(&self.name, format!("allows at most {} item(s), has {}", max, count));
            }
        }
        for id in &self.identifiers {
            if id.kind() != self.config.kind {
                errors.add(
                    &self.name,
                    format!("{} is not of type '{}'", id, self.config.kind),
                );
            }
        }
        errors.into_result()
    }
}

/// Identifiers stored in a relationship field
///
/// Accepts `"type:id"` strings, bare ids (typed as `default_kind`),
/// `{type, id}` maps, and arrays of any of these.
pub fn identifiers_from_value(value: &Value, default_kind: &str) -> Vec<Identifier> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| identifier_from_value(item, default_kind))
            .collect(),
        other => identifier_from_value(other, default_kind).into_iter().collect(),
    }
}

fn identifier_from_value(value: &Value, default_kind: &str) -> Option<Identifier> {
    match value {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(
            s.parse()
                .unwrap_or_else(|_| Identifier::new(default_kind, s.as_str())),
        ),
        Value::Int(i) => Some(Identifier::new(default_kind, i.to_string())),
        Value::Object(map) => {
            let id = map.get("id")?.to_scalar_string()?;
            let kind = map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or(default_kind);
            Some(Identifier::new(kind, id))
        }
        _ => None,
    }
}

/// Field value for a list of identifiers
pub fn identifiers_to_value(identifiers: &[Identifier], to_one: bool) -> Value {
    if to_one {
        identifiers
            .first()
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null)
    } else {
        Value::Array(
            identifiers
                .iter()
                .map(|id| Value::String(id.to_string()))
                .collect(),
        )
    }
}
