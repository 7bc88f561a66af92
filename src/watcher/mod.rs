//! Change-detection engines
//!
//! A [`Poller`] drives one [`Watch`] implementation through the cycle
//!
//! ```text
//! CONNECTING -> LISTENING -> FETCHING -> EVALUATING -> NOTIFYING
//!                   ^                                     |
//!                   |                                     v
//!               SLEEPING <------------------------- CHECKPOINTING
//! ```
//!
//! Two watches ship with the crate:
//!
//! - [`MailboxWatch`]: sequential source, UID watermark, subject filter.
//! - [`WorkspaceWatch`]: keyed source, latest refresh per dataset, dedup by
//!   request id.
//!
//! # Modules
//!
//! - [`format`]: Alert text rendering
//! - [`matcher`]: Subject and status matching
//! - [`poller`]: The state machine shared by both engines

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::source::SourceError;

pub mod format;
pub mod mailbox_watch;
pub mod matcher;
pub mod poller;
pub mod workspace_watch;

pub use mailbox_watch::MailboxWatch;
pub use matcher::{StatusMatcher, SubjectMatcher};
pub use poller::{CycleReport, Phase, Poller};
pub use workspace_watch::{RefreshCheck, WorkspaceWatch};

/// Sleep durations used by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Pause between successful cycles
    pub interval: Duration,
    /// Pause before reconnecting after a transient failure
    pub backoff: Duration,
}

/// What the engine decided about one fetched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not an alert candidate
    Ignore,
    /// Alert candidate already notified
    Duplicate,
    /// Item could not be evaluated; the reason is logged
    Skip(String),
    /// New alert; carries the rendered message
    Notify(String),
}

/// Engine-specific behaviour plugged into a [`Poller`].
///
/// The poller owns the loop, the state store, and the notifier. A watch
/// only knows how to talk to its source and how to judge an item against
/// the persisted state.
#[async_trait]
pub trait Watch: Send {
    /// Persisted state
    type State: Serialize + DeserializeOwned + Default + Send + Sync;
    /// One fetched item
    type Item: Send + Sync;

    /// Short engine name used in logs and messages
    fn name(&self) -> &'static str;

    /// Poll interval and reconnect backoff
    fn timing(&self) -> PollTiming;

    /// (Re)establish the source session and reconcile `state` with it.
    ///
    /// Returns `true` when `state` was modified and must be persisted.
    async fn connect(&mut self, state: &mut Self::State) -> Result<bool, SourceError>;

    /// Confirm the session is alive before fetching.
    async fn listen(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Retrieve every item newer than what `state` already covers.
    async fn fetch(&mut self, state: &Self::State) -> Result<Vec<Self::Item>, SourceError>;

    /// Judge an item against the persisted state.
    fn evaluate(&self, item: &Self::Item, state: &Self::State) -> Verdict;

    /// Record that `item` was handled. Returns `true` when `state` changed.
    fn checkpoint(&self, item: &Self::Item, verdict: &Verdict, state: &mut Self::State) -> bool;

    /// Persist after every item instead of once per cycle.
    fn persist_each_item(&self) -> bool;

    /// Message sent to the notifier when a cycle fails, if any.
    fn failure_alert(&self, _error: &SourceError) -> Option<String> {
        None
    }
}
