//! FlexDB - embedded flat-file object store
//!
//! Records live as one file or one folder each; every object type has an
//! index for listing and filtering without reading payloads, and
//! collections memoize expensive aggregate computations until the index
//! changes.
//!
//! # Quick Start
//!
//! ```no_run
//! use flexdb::{DirectoryConfig, FlexContext, Map, StreamLocator, Value};
//!
//! # fn main() -> flexdb::Result<()> {
//! let context = FlexContext::new(StreamLocator::new().with_stream("user", "/srv/site/user"));
//! let accounts = context.register("accounts", DirectoryConfig::new("user://accounts"))?;
//!
//! let mut data = Map::new();
//! data.insert("email".into(), Value::from("alice@example.com"));
//! accounts.update("Alice", data)?;
//!
//! let alice = accounts.object("alice")?;
//! assert!(alice.is_some());
//! context.flush_all()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - `flexdb-core`: values, records, identifiers, keys, errors
//! - `flexdb-storage`: file and folder backends, the index, atomic writes
//! - `flexdb-engine`: context, directories, objects, collections

pub use flexdb_core::*;
pub use flexdb_engine::*;
pub use flexdb_storage::{
    cleanup_temp_files, BackendOptions, FileBackend, FolderBackend, Formatter, Index, LoadOutcome,
    RecordStorage, RelocateField, RowPipeline, RowTransform, StreamLocator, StripFields,
    INDEX_FILE_NAME,
};
