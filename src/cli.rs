//! Command-line interface definition for biwatch
//!
//! This module defines the CLI structure using clap's derive API,
//! providing one command per engine plus one that runs both.

use clap::{Parser, Subcommand};

/// biwatch - Power BI failure monitor
///
/// Watches a mailbox for alert mail and Power BI workspaces for failed
/// dataset refreshes, and pushes a Telegram message for each new failure.
#[derive(Parser, Debug, Clone)]
#[command(name = "biwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/biwatch.yaml", env = "BIWATCH_CONFIG")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for biwatch
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Watch the mailbox for alert subjects
    Mailbox {
        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Watch workspace datasets for failed refreshes
    Workspaces {
        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run both engines side by side
    All {
        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_mailbox() {
        let cli = Cli::try_parse_from(["biwatch", "mailbox"]).unwrap();
        assert_eq!(cli.command, Commands::Mailbox { dry_run: false });
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_workspaces_dry_run() {
        let cli = Cli::try_parse_from(["biwatch", "workspaces", "--dry-run"]).unwrap();
        assert_eq!(cli.command, Commands::Workspaces { dry_run: true });
    }

    #[test]
    fn test_cli_parse_all_with_globals() {
        let cli =
            Cli::try_parse_from(["biwatch", "-v", "--config", "/etc/biwatch.yaml", "all"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, "/etc/biwatch.yaml");
        assert_eq!(cli.command, Commands::All { dry_run: false });
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["biwatch"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["biwatch", "chat"]).is_err());
    }
}
