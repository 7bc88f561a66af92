//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file output.
//! Integrates with the tracing ecosystem for structured event logging.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging based on configuration.
///
/// `RUST_LOG` wins over the configured level. `verbose` raises the configured
/// level to `debug` for this crate.
///
/// # Arguments
///
/// * `config` - Logging configuration
/// * `verbose` - Whether `--verbose` was passed on the command line
///
/// # Examples
///
/// ```no_run
/// use biwatch::config::LoggingConfig;
/// use biwatch::logging::init_logging;
///
/// let result = init_logging(&LoggingConfig::default(), false);
/// assert!(result.is_ok());
/// ```
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let directive = filter_directive(config, verbose);
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_format {
        let stdout_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(Arc::new(file));

            registry.with(stdout_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stdout_layer).try_init()?;
        }
    } else {
        let stdout_layer = fmt::layer().with_target(false).with_level(true);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_level(true)
                .with_writer(Arc::new(file));

            registry.with(stdout_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stdout_layer).try_init()?;
        }
    }

    Ok(())
}

fn filter_directive(config: &LoggingConfig, verbose: bool) -> String {
    if verbose {
        format!("{},biwatch=debug", config.level)
    } else {
        config.level.clone()
    }
}
