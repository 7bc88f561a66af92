//! biwatch - Power BI failure monitor
//!
#![doc = "Main entry point for the biwatch application."]

use std::path::Path;

use anyhow::Result;

use biwatch::cli::{Cli, Commands};
use biwatch::commands;
use biwatch::config::Config;
use biwatch::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; a missing file means defaults plus environment
    let config_found = Path::new(&cli.config).exists();
    let config = Config::load(&cli.config)?;

    init_logging(&config.logging, cli.verbose)?;

    if config_found {
        tracing::debug!("Loaded configuration from {}", cli.config);
    } else {
        tracing::debug!(
            "No configuration file at {}, using defaults and environment",
            cli.config
        );
    }

    // Execute command
    match cli.command {
        Commands::Mailbox { dry_run } => commands::mailbox::run_mailbox(config, dry_run).await,
        Commands::Workspaces { dry_run } => {
            commands::workspaces::run_workspaces(config, dry_run).await
        }
        Commands::All { dry_run } => commands::all::run_all(config, dry_run).await,
    }
}
