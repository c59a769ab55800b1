//! Core types and traits for FlexDB
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: closed variant type for record fields
//! - Record / RecordMeta: raw persisted field mapping plus storage metadata
//! - Identifier: (type, id) handle for objects and media
//! - StorageKey / KeyNormalizer: canonical keys and the normalization policy
//! - IndexEntry: per-key metadata held by an index
//! - Error: error type hierarchy
//! - Traits: collaborator contracts (Blueprint, Locator)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod identifier;
pub mod key;
pub mod record;
pub mod traits;
pub mod value;

pub use entry::IndexEntry;
pub use error::{Error, FieldError, Result, ValidationErrors};
pub use identifier::{Identifier, MEDIA_TYPE};
pub use key::{generate_key, validate_key, KeyNormalizer, StorageKey, TEMPORARY_KEY_MARKER};
pub use record::{Record, RecordMeta, ERROR_FIELD, META_FIELD};
pub use traits::{AcceptAll, Blueprint, Locator};
pub use value::{Map, Value};

/// xxh3 digest of `data` as 16 lowercase hex characters
pub fn xxh3_hex(data: &[u8]) -> String {
    use xxhash_rust::xxh3::xxh3_64;
    format!("{:016x}", xxh3_64(data))
}
