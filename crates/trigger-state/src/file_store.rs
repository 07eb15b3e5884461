//! JSON file-backed `StateStore`.
//!
//! The whole state lives in one pretty-printed JSON document. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! target, so a crash mid-write leaves the previous state intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::schema::PersistedState;
use crate::storage_traits::{StateStore, StorageResult};

/// Filesystem-backed state store.
pub struct FileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Create a store that reads and writes `path`. The parent directory is
    /// created on first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the state document.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_state(path: &Path) -> StorageResult<Option<PersistedState>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io(e)),
    };
    let state = serde_json::from_slice(&bytes).map_err(|e| {
        StorageError::Deserialization(format!("{}: {}", path.display(), e))
    })?;
    Ok(Some(state))
}

fn write_state(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> StorageResult<Option<PersistedState>> {
        let path = self.path.clone();
        let state = tokio::task::spawn_blocking(move || read_state(&path))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        debug!(found = state.is_some(), "loaded trigger state");
        Ok(state)
    }

    #[instrument(skip(self, state), fields(path = %self.path.display()))]
    async fn save(&self, state: &PersistedState) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_state(&path, &bytes))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        debug!(tracked = state.tracked_count(), "saved trigger state");
        Ok(())
    }
}
