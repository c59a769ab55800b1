//! Object engine for FlexDB
//!
//! This crate turns stored records into objects:
//! - FlexContext: explicit type → directory registry built from `flex.toml`
//! - FlexDirectory: storage, index and caches for one object type
//! - FlexObject: one record with dirty tracking, ACL and relationships
//! - FlexCollection: index-ordered view with lazy hydration and cached methods
//! - RelationshipResolver: identifier → object resolution through the context
//! - EventBus: synchronous save/delete hooks with mutable payloads
//! - MediaCollection: files attached to an object
//! - LegacyObject: the old object method names
//!
//! The engine never builds filesystem paths itself; every path comes from
//! the context's locator or from a storage backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod cache;
pub mod collection;
pub mod config;
pub mod context;
pub mod directory;
pub mod events;
pub mod legacy;
pub mod media;
pub mod object;
pub mod resolver;

pub use access::{Access, CRUD_RULES};
pub use cache::{CacheStats, CallSignature, MethodCache};
pub use collection::{CollectionIter, Direction, FlexCollection, Predicate, CACHED_METHODS};
pub use config::{DirectoryConfig, FlexConfig, RelationshipConfig, StorageKind, CONFIG_FILE_NAME, DEFAULT_RECORD_CACHE};
pub use context::FlexContext;
pub use directory::FlexDirectory;
pub use events::{EventBus, ObjectEvent, AFTER_DELETE, AFTER_SAVE, BEFORE_DELETE, BEFORE_SAVE, RENAMED};
pub use legacy::LegacyObject;
pub use media::{MediaCollection, MediaFile};
pub use object::FlexObject;
pub use resolver::{
    identifiers_from_value, identifiers_to_value, CollectionLookup, Relationship, RelationshipResolver,
};
