//! Test utilities for biwatch
//!
//! This module provides temporary directory management, test file creation,
//! and scripted doubles for the notifier and both source kinds.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::notifier::Notifier;
use crate::source::{
    DatasetRef, FetchedMail, KeyedSource, MailItem, RefreshOccurrence, SequentialSource,
    SessionInfo, SourceError,
};

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Notifier that records every message. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    /// Messages received so far, in order
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Sequential source double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MailboxScript {
    messages: Vec<FetchedMail>,
    uid_validity: Option<u32>,
    fail_connects: usize,
    fail_fetches: usize,
    fail_keepalives: usize,
    connects: usize,
}

/// In-memory mailbox. Clones share the same mailbox.
///
/// Like a real IMAP server answering `UID SEARCH UID n:*`, `fetch_since`
/// returns the newest message even when its UID is not above `last`.
#[derive(Clone, Default)]
pub struct ScriptedMailbox {
    script: Arc<Mutex<MailboxScript>>,
}

impl ScriptedMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a readable message
    pub fn deliver(&self, uid: u32, subject: &str, body: &str) {
        self.script
            .lock()
            .unwrap()
            .messages
            .push(FetchedMail::Parsed(MailItem {
                uid,
                subject: subject.to_string(),
                sender: "reports@example.com".to_string(),
                received_at: None,
                body: body.to_string(),
            }));
    }

    /// Add a message whose payload cannot be read
    pub fn deliver_malformed(&self, uid: u32) {
        self.script
            .lock()
            .unwrap()
            .messages
            .push(FetchedMail::Malformed {
                uid,
                reason: "empty payload".to_string(),
            });
    }

    pub fn set_uid_validity(&self, validity: Option<u32>) {
        self.script.lock().unwrap().uid_validity = validity;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.script.lock().unwrap().fail_connects = count;
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.script.lock().unwrap().fail_fetches = count;
    }

    pub fn fail_next_keepalives(&self, count: usize) {
        self.script.lock().unwrap().fail_keepalives = count;
    }

    /// Successful connections so far
    pub fn connect_count(&self) -> usize {
        self.script.lock().unwrap().connects
    }
}

fn take_failure(counter: &mut usize, what: &str) -> Result<(), SourceError> {
    if *counter > 0 {
        *counter -= 1;
        return Err(SourceError::Transient(format!("scripted {} failure", what)));
    }
    Ok(())
}

#[async_trait]
impl SequentialSource for ScriptedMailbox {
    async fn connect(&mut self) -> Result<SessionInfo, SourceError> {
        let mut script = self.script.lock().unwrap();
        take_failure(&mut script.fail_connects, "connect")?;
        script.connects += 1;
        Ok(SessionInfo {
            uid_validity: script.uid_validity,
        })
    }

    async fn baseline(&mut self) -> Result<Option<u32>, SourceError> {
        let script = self.script.lock().unwrap();
        Ok(script.messages.iter().map(FetchedMail::uid).max())
    }

    async fn fetch_since(&mut self, last: u32) -> Result<Vec<FetchedMail>, SourceError> {
        let mut script = self.script.lock().unwrap();
        take_failure(&mut script.fail_fetches, "fetch")?;

        let newer: Vec<FetchedMail> = script
            .messages
            .iter()
            .filter(|m| m.uid() > last)
            .cloned()
            .collect();
        if !newer.is_empty() {
            return Ok(newer);
        }

        Ok(script
            .messages
            .iter()
            .max_by_key(|m| m.uid())
            .cloned()
            .into_iter()
            .collect())
    }

    async fn keepalive(&mut self) -> Result<(), SourceError> {
        let mut script = self.script.lock().unwrap();
        take_failure(&mut script.fail_keepalives, "keepalive")
    }
}

// ---------------------------------------------------------------------------
// Keyed source double
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Latest {
    Refresh(Option<RefreshOccurrence>),
    Malformed,
}

#[derive(Default)]
struct WorkspaceScript {
    datasets: Vec<(DatasetRef, Latest)>,
    fail_auth: usize,
    authentications: usize,
}

/// In-memory set of workspaces and datasets. Clones share the same data.
#[derive(Clone, Default)]
pub struct ScriptedWorkspaces {
    script: Arc<Mutex<WorkspaceScript>>,
}

impl ScriptedWorkspaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset id assigned to `workspace`/`dataset`
    pub fn dataset_id(workspace: &str, dataset: &str) -> String {
        format!("{}-{}", workspace.to_lowercase(), dataset.to_lowercase())
    }

    /// Set the latest refresh of a dataset, creating it if needed
    pub fn set_latest(&self, workspace: &str, dataset: &str, latest: Option<RefreshOccurrence>) {
        self.upsert(workspace, dataset, Latest::Refresh(latest));
    }

    /// Make the refresh history of a dataset unreadable
    pub fn set_malformed(&self, workspace: &str, dataset: &str) {
        self.upsert(workspace, dataset, Latest::Malformed);
    }

    pub fn fail_next_auth(&self, count: usize) {
        self.script.lock().unwrap().fail_auth = count;
    }

    pub fn auth_count(&self) -> usize {
        self.script.lock().unwrap().authentications
    }

    fn upsert(&self, workspace: &str, dataset: &str, latest: Latest) {
        let dataset_id = Self::dataset_id(workspace, dataset);
        let mut script = self.script.lock().unwrap();

        if let Some(entry) = script
            .datasets
            .iter_mut()
            .find(|(d, _)| d.dataset_id == dataset_id)
        {
            entry.1 = latest;
            return;
        }

        script.datasets.push((
            DatasetRef {
                workspace_id: workspace.to_lowercase(),
                workspace_name: workspace.to_string(),
                dataset_id,
                dataset_name: dataset.to_string(),
            },
            latest,
        ));
    }
}

#[async_trait]
impl KeyedSource for ScriptedWorkspaces {
    async fn authenticate(&mut self) -> Result<(), SourceError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_auth > 0 {
            script.fail_auth -= 1;
            return Err(SourceError::Auth("scripted auth failure".to_string()));
        }
        script.authentications += 1;
        Ok(())
    }

    async fn list_entities(&mut self) -> Result<Vec<DatasetRef>, SourceError> {
        let script = self.script.lock().unwrap();
        Ok(script.datasets.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn fetch_latest(
        &mut self,
        entity: &DatasetRef,
    ) -> Result<Option<RefreshOccurrence>, SourceError> {
        let script = self.script.lock().unwrap();
        match script
            .datasets
            .iter()
            .find(|(d, _)| d.dataset_id == entity.dataset_id)
            .map(|(_, latest)| latest.clone())
        {
            Some(Latest::Refresh(latest)) => Ok(latest),
            Some(Latest::Malformed) => Err(SourceError::Malformed(
                "unexpected refresh payload".to_string(),
            )),
            None => Ok(None),
        }
    }
}
