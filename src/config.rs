//! Configuration management for biwatch
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from a YAML file and environment variables. The resulting
//! [`Config`] is built once at startup and passed by reference to every
//! engine; nothing reads credentials from the environment afterwards.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BiwatchError, Result};

/// Main configuration structure for biwatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Send a one-line message when an engine starts
    #[serde(default = "default_true")]
    pub notify_on_startup: bool,

    /// Telegram notification sink
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Mailbox engine settings
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Workspace engine settings
    #[serde(default)]
    pub workspaces: WorkspacesConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telegram Bot API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Destination chat id
    #[serde(default)]
    pub chat_id: String,

    /// API base URL (overridable for tests and proxies)
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_telegram_api_base(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Mailbox (IMAP) engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// IMAP server host name
    #[serde(default)]
    pub server: String,

    /// IMAP port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Login user name
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    /// Folder to watch
    #[serde(default = "default_folder")]
    pub folder: String,

    /// Case-insensitive substring that marks an alert subject
    #[serde(default = "default_subject_filter")]
    pub subject_filter: String,

    /// Optional regex that also marks an alert subject
    #[serde(default)]
    pub subject_pattern: Option<String>,

    /// Seconds between polls
    #[serde(default = "default_mailbox_interval")]
    pub poll_interval_secs: u64,

    /// Seconds to wait before reconnecting after a failure
    #[serde(default = "default_mailbox_interval")]
    pub reconnect_backoff_secs: u64,

    /// Upper bound for a single IMAP command, in seconds
    #[serde(default = "default_request_timeout")]
    pub command_timeout_secs: u64,

    /// Maximum body characters included in an alert
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    /// Where the cursor is persisted
    #[serde(default = "default_mailbox_state_file")]
    pub state_file: PathBuf,
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_subject_filter() -> String {
    "Erro no BI:".to_string()
}

fn default_mailbox_interval() -> u64 {
    60
}

fn default_max_body_chars() -> usize {
    3000
}

fn default_mailbox_state_file() -> PathBuf {
    PathBuf::from("mailbox_state.json")
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_imap_port(),
            username: String::new(),
            password: String::new(),
            folder: default_folder(),
            subject_filter: default_subject_filter(),
            subject_pattern: None,
            poll_interval_secs: default_mailbox_interval(),
            reconnect_backoff_secs: default_mailbox_interval(),
            command_timeout_secs: default_request_timeout(),
            max_body_chars: default_max_body_chars(),
            state_file: default_mailbox_state_file(),
        }
    }
}

/// Workspace (dataset refresh) engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspacesConfig {
    /// Directory tenant id
    #[serde(default)]
    pub tenant_id: String,

    /// Service principal client id
    #[serde(default)]
    pub client_id: String,

    /// Service principal secret
    #[serde(default)]
    pub client_secret: String,

    /// Token authority base URL
    #[serde(default = "default_authority_base")]
    pub authority_base: String,

    /// REST API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// OAuth scope requested for the API
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Refresh status that counts as a failure
    #[serde(default = "default_failure_status")]
    pub failure_status: String,

    /// Seconds between polls; also the backoff after a transient failure
    #[serde(default = "default_workspaces_interval")]
    pub poll_interval_secs: u64,

    /// HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum error-detail characters included in an alert
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,

    /// UTC offset, in hours, used to display failure times
    #[serde(default = "default_display_offset")]
    pub display_utc_offset_hours: i32,

    /// Send a warning message when a cycle fails
    #[serde(default = "default_true")]
    pub notify_cycle_errors: bool,

    /// Where dedup records are persisted
    #[serde(default = "default_workspaces_state_file")]
    pub state_file: PathBuf,
}

fn default_authority_base() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_api_base() -> String {
    "https://api.powerbi.com/v1.0/myorg".to_string()
}

fn default_scope() -> String {
    "https://analysis.windows.net/powerbi/api/.default".to_string()
}

fn default_failure_status() -> String {
    "Failed".to_string()
}

fn default_workspaces_interval() -> u64 {
    600
}

fn default_max_error_chars() -> usize {
    300
}

fn default_display_offset() -> i32 {
    -3
}

fn default_workspaces_state_file() -> PathBuf {
    PathBuf::from("monitor_state.json")
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authority_base: default_authority_base(),
            api_base: default_api_base(),
            scope: default_scope(),
            failure_status: default_failure_status(),
            poll_interval_secs: default_workspaces_interval(),
            request_timeout_secs: default_request_timeout(),
            max_error_chars: default_max_error_chars(),
            display_utc_offset_hours: default_display_offset(),
            notify_cycle_errors: true,
            state_file: default_workspaces_state_file(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notify_on_startup: true,
            telegram: TelegramConfig::default(),
            mailbox: MailboxConfig::default(),
            workspaces: WorkspacesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and the
    /// environment fills in the rest.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BiwatchError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BiwatchError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        // Variable names match the ones the alerting scripts used in .env files.
        if let Some(token) = env_value("TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = env_value("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }

        if let Some(server) = env_value("IMAP_SERVER") {
            self.mailbox.server = server;
        }
        if let Some(port) = env_parse("IMAP_PORT") {
            self.mailbox.port = port;
        }
        if let Some(user) = env_value("EMAIL_USER") {
            self.mailbox.username = user;
        }
        if let Some(pass) = env_value("EMAIL_PASS") {
            self.mailbox.password = pass;
        }
        if let Some(filter) = env_value("EMAIL_SUBJECT_FILTER") {
            self.mailbox.subject_filter = filter;
        }
        if let Some(folder) = env_value("BIWATCH_MAILBOX_FOLDER") {
            self.mailbox.folder = folder;
        }
        if let Some(path) = env_value("BIWATCH_MAILBOX_STATE_FILE") {
            self.mailbox.state_file = PathBuf::from(path);
        }

        if let Some(tenant) = env_value("TENANT_ID") {
            self.workspaces.tenant_id = tenant;
        }
        if let Some(client_id) = env_value("CLIENT_ID") {
            self.workspaces.client_id = client_id;
        }
        if let Some(secret) = env_value("CLIENT_SECRET") {
            self.workspaces.client_secret = secret;
        }
        if let Some(interval) = env_parse("BIWATCH_WORKSPACES_INTERVAL_SECS") {
            self.workspaces.poll_interval_secs = interval;
        }
        if let Some(path) = env_value("BIWATCH_WORKSPACES_STATE_FILE") {
            self.workspaces.state_file = PathBuf::from(path);
        }

        if let Some(level) = env_value("BIWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_parse("BIWATCH_JSON_LOGS") {
            self.logging.json_format = json;
        }
        if let Some(path) = env_value("BIWATCH_LOG_FILE") {
            self.logging.file_path = Some(PathBuf::from(path));
        }
    }

    /// Validate the notification sink.
    ///
    /// Dry-run mode logs alerts instead of sending them, so credentials are
    /// only required when `dry_run` is false.
    ///
    /// # Errors
    ///
    /// Returns error if the bot token or chat id is missing
    pub fn validate_notifier(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            return Ok(());
        }

        if self.telegram.bot_token.is_empty() || self.telegram.chat_id.is_empty() {
            return Err(BiwatchError::MissingCredentials(
                "TELEGRAM_TOKEN and TELEGRAM_CHAT_ID must be set".to_string(),
            )
            .into());
        }

        validate_url("telegram.api_base", &self.telegram.api_base)?;

        if self.telegram.timeout_secs == 0 {
            return Err(BiwatchError::Config(
                "telegram.timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validate the mailbox engine settings
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing or any value is out of range
    pub fn validate_mailbox(&self) -> Result<()> {
        let mailbox = &self.mailbox;

        if mailbox.server.is_empty() || mailbox.username.is_empty() || mailbox.password.is_empty()
        {
            return Err(BiwatchError::MissingCredentials(
                "IMAP_SERVER, EMAIL_USER and EMAIL_PASS must be set".to_string(),
            )
            .into());
        }

        for (field, value) in [
            ("mailbox.username", &mailbox.username),
            ("mailbox.password", &mailbox.password),
            ("mailbox.folder", &mailbox.folder),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(BiwatchError::Config(format!(
                    "{} must not contain line breaks",
                    field
                ))
                .into());
            }
        }

        if mailbox.folder.is_empty() {
            return Err(
                BiwatchError::Config("mailbox.folder cannot be empty".to_string()).into(),
            );
        }

        if mailbox.subject_filter.trim().is_empty() && mailbox.subject_pattern.is_none() {
            return Err(BiwatchError::Config(
                "mailbox.subject_filter cannot be empty unless subject_pattern is set"
                    .to_string(),
            )
            .into());
        }

        if let Some(pattern) = &mailbox.subject_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                BiwatchError::Config(format!("Invalid mailbox.subject_pattern: {}", e))
            })?;
        }

        if mailbox.port == 0 {
            return Err(BiwatchError::Config("mailbox.port cannot be 0".to_string()).into());
        }

        if mailbox.poll_interval_secs == 0
            || mailbox.reconnect_backoff_secs == 0
            || mailbox.command_timeout_secs == 0
        {
            return Err(BiwatchError::Config(
                "mailbox intervals and timeouts must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validate the workspace engine settings
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing or any value is out of range
    pub fn validate_workspaces(&self) -> Result<()> {
        let workspaces = &self.workspaces;

        if workspaces.tenant_id.is_empty()
            || workspaces.client_id.is_empty()
            || workspaces.client_secret.is_empty()
        {
            return Err(BiwatchError::MissingCredentials(
                "TENANT_ID, CLIENT_ID and CLIENT_SECRET must be set".to_string(),
            )
            .into());
        }

        validate_url("workspaces.authority_base", &workspaces.authority_base)?;
        validate_url("workspaces.api_base", &workspaces.api_base)?;

        if workspaces.failure_status.is_empty() {
            return Err(BiwatchError::Config(
                "workspaces.failure_status cannot be empty".to_string(),
            )
            .into());
        }

        if workspaces.poll_interval_secs == 0 || workspaces.request_timeout_secs == 0 {
            return Err(BiwatchError::Config(
                "workspaces intervals and timeouts must be greater than 0".to_string(),
            )
            .into());
        }

        if !(-12..=14).contains(&workspaces.display_utc_offset_hours) {
            return Err(BiwatchError::Config(
                "workspaces.display_utc_offset_hours must be between -12 and 14".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| BiwatchError::Config(format!("Invalid {}: {}", field, e)).into())
}

/// Reads a trimmed, non-empty environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads and parses an environment variable, warning on bad values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_value(name)?;
    match raw.parse() {
        Ok(value) => {
            tracing::debug!("Env override: {}", name);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: {}", name, raw);
            None
        }
    }
}
