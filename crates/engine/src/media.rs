//! Media files attached to objects
//!
//! Folder-backed objects keep media next to their data file. Other objects
//! share one media directory configured per type.

use flexdb_core::{Error, Identifier, Result};
use flexdb_storage::atomic::{is_temp_name, modified_micros, write_atomic};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One attached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time in microseconds since the Unix epoch
    pub modified: i64,
    /// Media identifier (`media:type/id/name`)
    pub identifier: Identifier,
}

/// Files in an object's media directory
#[derive(Debug, Clone)]
pub struct MediaCollection {
    owner: Identifier,
    path: PathBuf,
    shared: bool,
    reserved: Option<String>,
}

impl MediaCollection {
    /// Media stored in the record's own folder; `data_file` is never listed
    pub fn per_record(owner: Identifier, path: PathBuf, data_file: Option<String>) -> Self {
        MediaCollection {
            owner,
            path,
            shared: false,
            reserved: data_file,
        }
    }

    /// Media stored in a directory shared by all objects of a type
    pub fn shared(owner: Identifier, path: PathBuf) -> Self {
        MediaCollection {
            owner,
            path,
            shared: true,
            reserved: None,
        }
    }

    /// Owning object
    pub fn owner(&self) -> &Identifier {
        &self.owner
    }

    /// Directory holding the files
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory is shared with other objects
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// All files, sorted by name
    pub fn files(&self) -> Result<Vec<MediaFile>> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || is_temp_name(&name) || self.is_reserved(&name) {
                continue;
            }
            files.push(self.describe(name, &entry.metadata()?)?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// One file by name
    pub fn get(&self, name: &str) -> Result<Option<MediaFile>> {
        self.check_filename(name)?;
        match fs::metadata(self.path.join(name)) {
            Ok(meta) if meta.is_file() => Ok(Some(self.describe(name.to_string(), &meta)?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a file, replacing any file of the same name
    pub fn add(&self, name: &str, bytes: &[u8]) -> Result<MediaFile> {
        self.check_filename(name)?;
        let path = self.path.join(name);
        write_atomic(&path, bytes)?;
        debug!(target: "flexdb::object", owner = %self.owner, file = name, bytes = bytes.len(), "Media file stored");
        self.describe(name.to_string(), &fs::metadata(&path)?)
    }

    /// Remove a file; absent files are ignored
    pub fn remove(&self, name: &str) -> Result<()> {
        self.check_filename(name)?;
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved.as_deref() == Some(name)
    }

    fn describe(&self, name: String, meta: &fs::Metadata) -> Result<MediaFile> {
        Ok(MediaFile {
            identifier: Identifier::media(&self.owner, &name),
            path: self.path.join(&name),
            size: meta.len(),
            modified: modified_micros(meta)?,
            name,
        })
    }

    fn check_filename(&self, name: &str) -> Result<()> {
        let reason = if name.is_empty() {
            Some("file name is empty")
        } else if name.starts_with('.') {
            Some("file name must not start with '.'")
        } else if name.contains(['/', '\\', '\0']) {
            Some("file name must not contain path separators")
        } else if self.is_reserved(name) {
            Some("file name is reserved for the record data")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidKey {
                key: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}
