//! Crash-safe file writes
//!
//! Uses the write-fsync-rename pattern:
//! 1. Write to a hidden temporary file next to the target
//! 2. fsync the temporary file
//! 3. Atomic rename onto the final path
//! 4. fsync the parent directory
//!
//! A reader therefore sees either the previous content or the new content,
//! never a partial write. Interrupted writes leave `.*.tmp` files behind;
//! [`cleanup_temp_files`] removes them.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const TEMP_SUFFIX: &str = ".tmp";

/// Temporary sibling path for an atomic write to `path`
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}{}", name, &nonce[..8], TEMP_SUFFIX))
}

/// Atomically replace `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let temp_path = temp_path_for(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;
    let written = file.write_all(bytes).and_then(|_| file.sync_all());
    drop(file);

    if let Err(e) = written.and_then(|_| fs::rename(&temp_path, path)) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_dir(dir)
}

/// fsync a directory so a completed rename survives a crash
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

/// True for names produced by an interrupted [`write_atomic`]
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Remove temporary files left by interrupted writes
///
/// Walks `root` and its subdirectories up to `depth` levels deep.
/// Returns the number of files removed.
pub fn cleanup_temp_files(root: &Path, depth: usize) -> io::Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_file() && is_temp_name(&name) {
            fs::remove_file(entry.path())?;
            count += 1;
        } else if file_type.is_dir() && depth > 0 && !name.starts_with('.') {
            count += cleanup_temp_files(&entry.path(), depth - 1)?;
        }
    }
    Ok(count)
}

/// Modification time in microseconds since the Unix epoch
pub fn modified_micros(meta: &Metadata) -> io::Result<i64> {
    let modified = meta.modified()?;
    let micros = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    Ok(micros)
}

/// Modification time of `path`, or `None` if it does not exist
pub fn stat_micros(path: &Path) -> io::Result<Option<i64>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(modified_micros(&meta)?)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
