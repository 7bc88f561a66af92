//! Durable engine state
//!
//! Each engine persists its state as a small, human-readable JSON document.
//! Loading never fails: a missing or corrupted file is a cold start. Saving
//! writes a sibling temporary file and renames it into place, so an
//! interrupted write leaves the previous state intact.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BiwatchError, Result};

pub mod types;
pub use types::{DedupRecord, DedupState, MailboxCursor};

/// JSON file backing one engine's state.
#[derive(Debug, Clone)]
pub struct JsonStateStore<S> {
    path: PathBuf,
    _state: PhantomData<fn() -> S>,
}

impl<S> JsonStateStore<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    /// Create a store for the given file path. Nothing is touched on disk.
    ///
    /// # Examples
    ///
    /// ```
    /// use biwatch::storage::{JsonStateStore, MailboxCursor};
    ///
    /// let store: JsonStateStore<MailboxCursor> = JsonStateStore::new("mailbox_state.json");
    /// assert!(store.path().ends_with("mailbox_state.json"));
    /// ```
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    ///
    /// Missing, empty, unreadable, or malformed files all yield
    /// `S::default()`; the latter two are logged at warn level.
    pub fn load(&self) -> S {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file found, starting cold");
                return S::default();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read state file, starting cold"
                );
                return S::default();
            }
        };

        if contents.trim().is_empty() {
            info!(path = %self.path.display(), "State file is empty, starting cold");
            return S::default();
        }

        match serde_json::from_str(&contents) {
            Ok(state) => {
                debug!(path = %self.path.display(), "Loaded state file");
                state
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is malformed, starting cold"
                );
                S::default()
            }
        }
    }

    /// Persist `state`, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`BiwatchError::Persistence`] if the temporary file cannot be
    /// written or renamed. The previous state file is left untouched.
    pub fn save(&self, state: &S) -> Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(BiwatchError::Serialization)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    BiwatchError::Persistence(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let tmp_path = self.temp_path();
        if let Err(e) = write_synced(&tmp_path, json.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(BiwatchError::Persistence(format!(
                "failed to write {}: {}",
                tmp_path.display(),
                e
            ))
            .into());
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(BiwatchError::Persistence(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            ))
            .into());
        }

        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.write_all(b"\n")?;
    file.sync_all()
}
