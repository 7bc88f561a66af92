//! Notification sinks
//!
//! A [`Notifier`] is best-effort by contract: it never returns an error to
//! the poller. Delivery failures are logged inside the implementation and the
//! engine carries on checkpointing.

use async_trait::async_trait;
use tracing::info;

pub mod telegram;

pub use telegram::TelegramNotifier;

/// Delivers a preformatted text message to a configured destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Attempt delivery of `text`. Failures are logged, never returned.
    async fn send(&self, text: &str);
}

/// Notifier that only logs the message. Used in dry-run mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        info!(message = %text, "Dry-run: notification not sent");
    }
}
