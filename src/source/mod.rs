//! Source adapter contracts
//!
//! The poller never talks to IMAP or HTTP directly. It drives one of two
//! capability traits:
//!
//! - [`SequentialSource`]: a totally ordered source (a mailbox) where every
//!   item carries an increasing integer identifier usable as a watermark.
//! - [`KeyedSource`]: a set of entities (datasets) that only expose their
//!   latest occurrence; change is detected per entity by comparing keys.
//!
//! Implementations are picked at construction time: [`crate::mailbox::ImapMailbox`]
//! and [`crate::workspace::WorkspaceClient`] in production, scripted doubles
//! in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a source can surface to the poller.
///
/// The variant decides what the poller does next: transient failures send it
/// back to reconnecting, auth failures abort the current cycle, malformed
/// responses skip a single item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Credentials were rejected or a token could not be obtained
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network, timeout, or server-side failure worth retrying
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The source answered with something that could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Returns `true` when the poller should reconnect and retry the cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Sequential (mailbox) items
// ---------------------------------------------------------------------------

/// A fully parsed message from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailItem {
    /// IMAP UID; strictly increasing within one UIDVALIDITY epoch
    pub uid: u32,
    /// Decoded subject line
    pub subject: String,
    /// Decoded `From` header
    pub sender: String,
    /// `Date` header, when it parses
    pub received_at: Option<DateTime<Utc>>,
    /// Plain-text body
    pub body: String,
}

/// One entry of a sequential batch.
///
/// A message that could not be retrieved or decoded still occupies its UID
/// so the watermark can move past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedMail {
    /// Message retrieved and decoded
    Parsed(MailItem),
    /// Message whose payload could not be read
    Malformed {
        /// UID of the unreadable message
        uid: u32,
        /// What went wrong
        reason: String,
    },
}

impl FetchedMail {
    /// The UID this entry occupies.
    pub fn uid(&self) -> u32 {
        match self {
            FetchedMail::Parsed(item) => item.uid,
            FetchedMail::Malformed { uid, .. } => *uid,
        }
    }
}

/// Facts about a freshly established mailbox session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// UIDVALIDITY of the selected folder, if the server reported one
    pub uid_validity: Option<u32>,
}

/// A totally ordered source addressed by an increasing integer identifier.
#[async_trait]
pub trait SequentialSource: Send {
    /// (Re)establishes the underlying session, replacing any previous one.
    async fn connect(&mut self) -> Result<SessionInfo, SourceError>;

    /// Returns the highest identifier currently present, without fetching
    /// any item. `None` means the source is empty.
    async fn baseline(&mut self) -> Result<Option<u32>, SourceError>;

    /// Returns every item with an identifier strictly greater than `last`,
    /// ascending. Servers may echo older identifiers; callers must filter.
    async fn fetch_since(&mut self, last: u32) -> Result<Vec<FetchedMail>, SourceError>;

    /// Cheap liveness check issued between cycles.
    async fn keepalive(&mut self) -> Result<(), SourceError>;
}

// ---------------------------------------------------------------------------
// Keyed (workspace) items
// ---------------------------------------------------------------------------

/// A dataset tracked by the keyed engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Workspace (group) identifier
    pub workspace_id: String,
    /// Workspace display name
    pub workspace_name: String,
    /// Dataset identifier; the dedup key
    pub dataset_id: String,
    /// Dataset display name
    pub dataset_name: String,
}

/// The most recent refresh of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOccurrence {
    /// Unique id of this refresh run
    pub request_id: Option<String>,
    /// Refresh status as reported by the API (`Completed`, `Failed`, ...)
    pub status: String,
    /// End time as reported by the API (ISO 8601)
    pub end_time: Option<String>,
    /// Raw error payload for failed refreshes
    pub error_detail: Option<String>,
}

/// A source of entities that only expose their latest occurrence.
#[async_trait]
pub trait KeyedSource: Send {
    /// Acquires fresh credentials for this cycle. Never cached across cycles.
    async fn authenticate(&mut self) -> Result<(), SourceError>;

    /// Lists every entity currently reachable.
    async fn list_entities(&mut self) -> Result<Vec<DatasetRef>, SourceError>;

    /// Returns the latest occurrence for `entity`, or `None` without history.
    async fn fetch_latest(
        &mut self,
        entity: &DatasetRef,
    ) -> Result<Option<RefreshOccurrence>, SourceError>;
}
