/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `mailbox`: watch the mailbox for alert mail
- `workspaces`: watch workspace datasets for failed refreshes
- `all`: run both engines in one process

Each handler validates the part of the configuration it needs, builds the
notifier and poller, and runs until SIGINT or SIGTERM.
*/

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::error::{BiwatchError, Result};
use crate::mailbox::ImapMailbox;
use crate::notifier::{LogNotifier, Notifier, TelegramNotifier};
use crate::storage::JsonStateStore;
use crate::watcher::format::startup_message;
use crate::watcher::{MailboxWatch, Poller, Watch, WorkspaceWatch};
use crate::workspace::WorkspaceClient;

/// Build the notifier: logging only in dry-run mode, Telegram otherwise.
pub fn build_notifier(config: &Config, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        info!("Dry-run mode: alerts will be logged, not sent");
        return Ok(Arc::new(LogNotifier));
    }
    Ok(Arc::new(TelegramNotifier::new(&config.telegram)?))
}

fn mailbox_poller(
    config: &Config,
    notifier: Arc<dyn Notifier>,
) -> Result<Poller<MailboxWatch<ImapMailbox>>> {
    let source = ImapMailbox::new(&config.mailbox)?;
    let watch = MailboxWatch::new(source, &config.mailbox)?;
    let store = JsonStateStore::new(&config.mailbox.state_file);
    Ok(Poller::new(watch, store, notifier))
}

fn workspaces_poller(
    config: &Config,
    notifier: Arc<dyn Notifier>,
) -> Result<Poller<WorkspaceWatch<WorkspaceClient>>> {
    let source = WorkspaceClient::new(&config.workspaces)?;
    let watch = WorkspaceWatch::new(source, &config.workspaces);
    let store = JsonStateStore::new(&config.workspaces.state_file);
    Ok(Poller::new(watch, store, notifier))
}

async fn announce(config: &Config, notifier: &dyn Notifier, engine: &str) {
    if config.notify_on_startup {
        notifier.send(&startup_message(engine)).await;
    }
}

/// Span wrapping every log line of one engine.
fn poller_span(source: &'static str) -> Span {
    info_span!("poller", source = source)
}

/// Run a poller until a shutdown signal arrives, then flush its state.
async fn run_until_shutdown<W: Watch>(poller: &mut Poller<W>) -> Result<()> {
    let span = poller_span(poller.watch().name());
    let shutdown = shutdown_signal()?;
    tokio::select! {
        _ = poller.run().instrument(span) => {}
        _ = shutdown => {}
    }
    poller.shutdown();
    Ok(())
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(BiwatchError::Io)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(BiwatchError::Io)?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Caught SIGTERM, stopping"),
            _ = sigint.recv() => info!("Caught SIGINT, stopping"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Caught Ctrl-C, stopping");
    })
}

pub mod mailbox {
    use super::*;

    /// Run the mailbox engine until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox or notifier configuration is
    /// incomplete, or if the TLS client cannot be built.
    pub async fn run_mailbox(config: Config, dry_run: bool) -> Result<()> {
        config.validate_mailbox()?;
        config.validate_notifier(dry_run)?;

        let notifier = build_notifier(&config, dry_run)?;
        let mut poller = mailbox_poller(&config, notifier.clone())?;

        info!(
            server = %config.mailbox.server,
            folder = %config.mailbox.folder,
            "Starting mailbox monitor"
        );
        announce(&config, notifier.as_ref(), "mailbox").await;

        run_until_shutdown(&mut poller).await
    }
}

pub mod workspaces {
    use super::*;

    /// Run the workspace engine until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace or notifier configuration is
    /// incomplete.
    pub async fn run_workspaces(config: Config, dry_run: bool) -> Result<()> {
        config.validate_workspaces()?;
        config.validate_notifier(dry_run)?;

        let notifier = build_notifier(&config, dry_run)?;
        let mut poller = workspaces_poller(&config, notifier.clone())?;

        info!(
            interval_secs = config.workspaces.poll_interval_secs,
            "Starting workspace monitor"
        );
        announce(&config, notifier.as_ref(), "workspaces").await;

        run_until_shutdown(&mut poller).await
    }
}

pub mod all {
    use super::*;

    /// Run both engines concurrently until shutdown.
    ///
    /// Both pollers are driven from this task with `select!`, so shutdown
    /// can flush each one's state. Each engine keeps its own state file,
    /// timing and reconnect logic; they only share the notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if either engine's configuration is incomplete.
    pub async fn run_all(config: Config, dry_run: bool) -> Result<()> {
        config.validate_mailbox()?;
        config.validate_workspaces()?;
        config.validate_notifier(dry_run)?;

        if config.mailbox.state_file == config.workspaces.state_file {
            warn!("Both engines share a state file; they will overwrite each other");
        }

        let notifier = build_notifier(&config, dry_run)?;
        let mut mailbox = mailbox_poller(&config, notifier.clone())?;
        let mut workspaces = workspaces_poller(&config, notifier.clone())?;

        info!("Starting mailbox and workspace monitors");
        announce(&config, notifier.as_ref(), "mailbox and workspaces").await;

        let mailbox_span = poller_span(mailbox.watch().name());
        let workspaces_span = poller_span(workspaces.watch().name());
        let shutdown = shutdown_signal()?;
        tokio::select! {
            _ = mailbox.run().instrument(mailbox_span) => {}
            _ = workspaces.run().instrument(workspaces_span) => {}
            _ = shutdown => {}
        }

        mailbox.shutdown();
        workspaces.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_notifier_dry_run_needs_no_credentials() {
        let config = Config::default();
        assert!(build_notifier(&config, true).is_ok());
        assert!(build_notifier(&config, false).is_err());
    }

    #[tokio::test]
    async fn test_run_mailbox_rejects_missing_credentials() {
        let err = mailbox::run_mailbox(Config::default(), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("IMAP_SERVER"));
    }

    #[tokio::test]
    async fn test_run_workspaces_requires_notifier_credentials() {
        let mut config = Config::default();
        config.workspaces.tenant_id = "t".to_string();
        config.workspaces.client_id = "c".to_string();
        config.workspaces.client_secret = "s".to_string();

        let err = workspaces::run_workspaces(config, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_TOKEN"));
    }

    #[test]
    fn test_poller_span_names_the_engine() {
        let dir = crate::test_utils::temp_dir();
        let mut config = Config::default();
        config.workspaces.state_file = dir.path().join("dedup.json");
        let poller = workspaces_poller(&config, Arc::new(LogNotifier)).unwrap();

        let span = poller_span(poller.watch().name());
        let meta = span.metadata().unwrap();
        assert_eq!(meta.name(), "poller");
        assert_eq!(*meta.level(), tracing::Level::INFO);
        assert!(meta.fields().field("source").is_some());
    }

    #[test]
    fn test_workspaces_poller_uses_configured_state_file() {
        let dir = crate::test_utils::temp_dir();
        let mut config = Config::default();
        config.workspaces.state_file = dir.path().join("dedup.json");

        let poller = workspaces_poller(&config, Arc::new(LogNotifier)).unwrap();
        assert!(poller.state().is_empty());
    }
}
