//! Persisted device directory

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{DeviceDirectory, SCHEMA_VERSION};
use crate::{Error, Result};

/// JSON file holding the last discovered directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    path: PathBuf,
}

impl DirectoryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted directory
    ///
    /// A missing file, unparsable content or a different schema version
    /// all yield `None` so the caller rediscovers.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but cannot be read
    pub fn load(&self) -> Result<Option<DeviceDirectory>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<DeviceDirectory>(&content) {
            Ok(dir) if dir.schema == SCHEMA_VERSION => {
                tracing::debug!(
                    path = %self.path.display(),
                    devices = dir.len(),
                    "loaded device directory"
                );
                Ok(Some(dir))
            }
            Ok(dir) => {
                tracing::info!(
                    path = %self.path.display(),
                    schema = dir.schema,
                    "ignoring device directory with unknown schema"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring unreadable device directory"
                );
                Ok(None)
            }
        }
    }

    /// Persist `directory`, replacing the previous copy only once fully written
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if any step of the write fails
    pub fn save(&self, directory: &DeviceDirectory) -> Result<()> {
        let storage = |what: &str, e: &dyn std::fmt::Display| {
            Error::Storage(format!("{what} {}: {e}", self.path.display()))
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| storage("cannot create dir for", &e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| storage("cannot create temp file for", &e))?;
        serde_json::to_writer_pretty(&mut tmp, directory)
            .map_err(|e| storage("cannot encode", &e))?;
        tmp.flush().map_err(|e| storage("cannot write", &e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| storage("cannot sync", &e))?;
        tmp.persist(&self.path)
            .map_err(|e| storage("cannot replace", &e.error))?;

        tracing::info!(
            path = %self.path.display(),
            devices = directory.len(),
            "saved device directory"
        );
        Ok(())
    }

    /// Delete the persisted copy; a missing file is not an error
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "device directory invalidated");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
