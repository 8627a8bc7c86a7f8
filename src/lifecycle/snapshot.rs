//! Durable copy of the last applied engine configuration

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LifecycleError;

/// File-backed store for the merged configuration blob
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl std::fmt::Display) -> LifecycleError {
        LifecycleError::snapshot(self.path.display().to_string(), reason.to_string())
    }

    /// Persist `blob`, replacing any previous snapshot
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Snapshot` if the directory cannot be created
    /// or the file cannot be written.
    pub fn write(&self, blob: &[u8]) -> Result<(), LifecycleError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob).map_err(|e| self.error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.error(e))?;

        debug!("Config snapshot written to {:?} ({} bytes)", self.path, blob.len());
        Ok(())
    }

    /// Load the snapshot, `None` if none was ever written
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Snapshot` for any read failure other than a
    /// missing file.
    pub fn read(&self) -> Result<Option<Vec<u8>>, LifecycleError> {
        match std::fs::read(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.error(e)),
        }
    }
}
