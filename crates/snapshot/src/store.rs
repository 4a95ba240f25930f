//! Filesystem-based snapshot storage

use crate::{SnapshotError, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Snapshot files under a single data directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Base directory for storing snapshots
    root: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| SnapshotError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Atomically replace the snapshot at `name` (relative to the root)
    pub fn store<T: Serialize>(
        &self,
        name: impl AsRef<Path>,
        kind: &str,
        body: &T,
    ) -> Result<(), SnapshotError> {
        let path = self.root.join(name);
        let bytes = encode(kind, body)?;

        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| SnapshotError::io(&parent, e))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = File::create(&tmp).map_err(|e| SnapshotError::io(&tmp, e))?;
            file.write_all(&bytes)
                .map_err(|e| SnapshotError::io(&tmp, e))?;
            file.sync_all().map_err(|e| SnapshotError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| SnapshotError::io(&path, e))?;
        sync_dir(&parent)?;

        tracing::trace!("Stored {} snapshot at {}", kind, path.display());
        Ok(())
    }

    /// Load the snapshot at `name`, or `None` if it was never written
    pub fn load<T: DeserializeOwned>(
        &self,
        name: impl AsRef<Path>,
        kind: &str,
    ) -> Result<Option<T>, SnapshotError> {
        let path = self.root.join(name);
        match fs::read(&path) {
            Ok(bytes) => decode(kind, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SnapshotError::io(&path, e)),
        }
    }

    /// Delete the snapshot at `name`; a missing file is not an error
    pub fn remove(&self, name: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = self.root.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::io(&path, e)),
        }
    }

    /// Delete the directory at `name` and everything under it
    pub fn remove_dir(&self, name: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = self.root.join(name);
        match fs::remove_dir_all(&path) {
            Ok(()) => sync_dir(&self.root),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::io(&path, e)),
        }
    }

    /// Names of the subdirectories directly under the root
    pub fn list_dirs(&self) -> Result<Vec<String>, SnapshotError> {
        let entries = fs::read_dir(&self.root).map_err(|e| SnapshotError::io(&self.root, e))?;

        let mut dirs = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            if entry.file_type().is_ok_and(|t| t.is_dir())
                && let Some(name) = entry.file_name().to_str()
            {
                dirs.push(name.to_string());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

fn sync_dir(dir: &Path) -> Result<(), SnapshotError> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| SnapshotError::io(dir, e))
}
