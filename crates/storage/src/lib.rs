//! Storage layer for FlexDB
//!
//! This crate implements record persistence and indexing:
//! - RecordStorage: backend contract, with FileBackend and FolderBackend
//! - RowTransform / RowPipeline: row preparation before writes
//! - Formatter: JSON and TOML payloads
//! - StreamLocator: stream URI → filesystem path resolution
//! - Index: ordered key → metadata mapping with a persisted blob cache
//! - atomic: crash-safe temp + rename writes
//!
//! The storage layer has no knowledge of objects or schemas; it moves
//! records between memory and disk.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic;
pub mod backend;
mod blob;
pub mod file;
pub mod folder;
pub mod format;
pub mod index;
pub mod locator;
pub mod transform;

pub use atomic::{cleanup_temp_files, write_atomic};
pub use backend::{BackendOptions, KeyIter, RecordStorage};
pub use file::FileBackend;
pub use folder::{FolderBackend, DEFAULT_DATA_FILE};
pub use format::Formatter;
pub use index::{fingerprint_of, Index, LoadOutcome, INDEX_FILE_NAME};
pub use locator::StreamLocator;
pub use transform::{RelocateField, RowPipeline, RowTransform, StripFields};
