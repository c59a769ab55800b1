//! Persisted index blob
//!
//! One file per collection root (`.flex-index`) holding:
//! - Fingerprint of the (key, timestamp) pairs it was built from
//! - Creation time, used to detect a concurrent writer on save
//! - Tag fields the entries were built with
//! - Ordered index entries
//!
//! Layout: magic + version (u32 LE) + MessagePack payload.
//! Written atomically via temp + rename. The blob is a cache: any decode
//! failure is reported as `Error::CorruptIndex` and the caller rebuilds.

use crate::atomic::write_atomic;
use flexdb_core::{Error, IndexEntry, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Magic bytes for the index blob
const INDEX_MAGIC: &[u8; 4] = b"FXIX";
/// Current blob version; any other version forces a rebuild
pub(crate) const INDEX_VERSION: u32 = 1;

// ============================================================================
// Blob Data (serializable)
// ============================================================================

/// Serializable representation of an index
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexData {
    /// xxh3 over sorted (key, timestamp) pairs
    pub fingerprint: String,
    /// When this blob was written, microseconds since the Unix epoch
    pub created_at: i64,
    /// Record fields copied into entry tags
    pub tag_fields: Vec<String>,
    /// Entries in index order
    pub entries: Vec<IndexEntry>,
}

// ============================================================================
// Read / Write
// ============================================================================

/// Write the blob atomically
pub(crate) fn write_index(path: &Path, data: &IndexData) -> Result<()> {
    let payload =
        rmp_serde::to_vec(data).map_err(|e| Error::Serialization(format!("index encode: {}", e)))?;

    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(INDEX_MAGIC);
    buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload);

    write_atomic(path, &buf)?;
    Ok(())
}

/// Read the blob; I/O errors pass through, anything else is corruption
pub(crate) fn read_index(path: &Path) -> Result<IndexData> {
    let buf = std::fs::read(path)?;
    if buf.len() < 8 {
        return Err(Error::CorruptIndex("index blob too small".to_string()));
    }
    if &buf[0..4] != INDEX_MAGIC {
        return Err(Error::CorruptIndex("bad index magic".to_string()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&buf[4..8]);
    let version = u32::from_le_bytes(version);
    if version != INDEX_VERSION {
        return Err(Error::CorruptIndex(format!(
            "unsupported index version {}",
            version
        )));
    }
    rmp_serde::from_slice(&buf[8..]).map_err(|e| Error::CorruptIndex(format!("decode error: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================
