//! Flat, human-readable JSON persistence with full-state overwrite.
//!
//! Every store in the workspace keeps its authoritative state in memory and
//! hands the whole of it to a [`JsonFile`] after each mutation. Writes go to a
//! sibling temp file which is then renamed over the target, so a crash
//! mid-write leaves the previous state intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StorageError;

/// A JSON document on disk, or nowhere for in-memory stores.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: Option<PathBuf>,
}

impl JsonFile {
    /// A file-backed document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A document that is never read from or written to disk.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the document, returning `T::default()` when it does not exist yet.
    pub fn load<T>(&self) -> Result<T, StorageError>
    where
        T: DeserializeOwned + Default,
    {
        let Some(path) = &self.path else {
            return Ok(T::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "No state file yet, starting empty");
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        let value = serde_json::from_str(&content)?;
        debug!(path = %path.display(), bytes = content.len(), "State file loaded");
        Ok(value)
    }

    /// Overwrite the document with `value`.
    pub fn store<T>(&self, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
        }
        let content = serde_json::to_string_pretty(value)?;
        let tmp = temp_path(path);
        write_synced(&tmp, content.as_bytes()).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
        debug!(path = %path.display(), bytes = content.len(), "State file written");
        Ok(())
    }
}

/// Write `bytes` and wait until they reach the disk.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}
