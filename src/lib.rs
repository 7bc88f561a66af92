//! biwatch - Power BI failure monitor
//!
//! biwatch runs two independent change-detection engines and pushes a
//! message for every new failure it finds:
//!
//! - the **mailbox** engine follows an IMAP folder by UID and alerts on mail
//!   whose subject matches a filter;
//! - the **workspaces** engine polls the latest refresh of every Power BI
//!   dataset and alerts once per failed refresh request.
//!
//! Both engines share the same [`watcher::Poller`] state machine, persist
//! their progress through [`storage::JsonStateStore`], and notify through a
//! best-effort [`notifier::Notifier`].

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod notifier;
pub mod source;
pub mod storage;
pub mod watcher;
pub mod workspace;

// Re-export commonly used types
pub use config::Config;
pub use error::{BiwatchError, Result};
pub use source::SourceError;
pub use watcher::{Phase, Poller};

#[cfg(test)]
pub mod test_utils;
