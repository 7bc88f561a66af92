//! Minimal IMAP4rev1 client
//!
//! Only the commands the mailbox engine needs are implemented: `LOGIN`,
//! `SELECT`, `UID SEARCH`, `UID FETCH`, `NOOP` and `LOGOUT`. Every command
//! runs under a timeout so a half-open connection surfaces as an error
//! instead of hanging the poller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::mime::parse_message;
use crate::config::MailboxConfig;
use crate::source::{FetchedMail, MailItem, SequentialSource, SessionInfo, SourceError};

/// Largest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 32 * 1024 * 1024;

/// Errors raised by the IMAP client
#[derive(Error, Debug)]
pub enum ImapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("Server rejected command: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Literal of {0} bytes exceeds the size limit")]
    TooLarge(usize),
}

/// One untagged server response, with any literals it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
    /// Size of a literal that was discarded for exceeding the limit
    oversized: Option<usize>,
}

/// An authenticated-or-not IMAP session over any byte stream.
pub struct ImapSession<T> {
    stream: BufReader<T>,
    next_tag: u32,
    timeout: Duration,
    max_literal: usize,
}

impl<T> ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 0,
            timeout,
            max_literal: MAX_LITERAL_BYTES,
        }
    }

    /// Read the server greeting.
    pub async fn start(&mut self) -> Result<(), ImapError> {
        let (greeting, _, _) = tokio::time::timeout(self.timeout, self.read_logical_line())
            .await
            .map_err(|_| ImapError::Timeout("greeting".to_string()))??;

        let upper = greeting.to_ascii_uppercase();
        if upper.starts_with("* OK") || upper.starts_with("* PREAUTH") {
            debug!(greeting = %greeting, "IMAP greeting");
            Ok(())
        } else if upper.starts_with("* BYE") {
            Err(ImapError::Rejected(greeting))
        } else {
            Err(ImapError::Protocol(format!("unexpected greeting: {}", greeting)))
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ImapError> {
        self.command(&format!("LOGIN {} {}", quote(username), quote(password)))
            .await
            .map(|_| ())
    }

    /// Select `folder` read-write; returns its UIDVALIDITY if reported.
    pub async fn select(&mut self, folder: &str) -> Result<Option<u32>, ImapError> {
        let responses = self.command(&format!("SELECT {}", quote(folder))).await?;
        Ok(responses.iter().find_map(|r| uid_validity(&r.text)))
    }

    /// Run `UID SEARCH <criteria>` and return the UIDs found.
    pub async fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, ImapError> {
        let responses = self.command(&format!("UID SEARCH {}", criteria)).await?;

        let mut uids = Vec::new();
        for response in &responses {
            let Some(rest) = strip_keyword(&response.text, "SEARCH") else {
                continue;
            };
            for token in rest.split_whitespace() {
                let uid = token
                    .parse()
                    .map_err(|_| ImapError::Protocol(format!("bad UID in SEARCH: {}", token)))?;
                uids.push(uid);
            }
        }

        Ok(uids)
    }

    /// Fetch the raw RFC 822 message for `uid` without setting `\Seen`.
    ///
    /// Returns `None` if the server sent no body, e.g. the message was
    /// expunged in the meantime. A body over the size limit is discarded and
    /// reported as [`ImapError::TooLarge`] once the command has completed, so
    /// the session stays usable.
    pub async fn uid_fetch_message(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let responses = self
            .command(&format!("UID FETCH {} (UID BODY.PEEK[])", uid))
            .await?;

        for mut response in responses {
            if !response.text.contains("FETCH") || fetch_uid(&response.text) != Some(uid) {
                continue;
            }
            if let Some(len) = response.oversized {
                return Err(ImapError::TooLarge(len));
            }
            if !response.literals.is_empty() {
                return Ok(Some(response.literals.swap_remove(0)));
            }
        }

        Ok(None)
    }

    pub async fn noop(&mut self) -> Result<(), ImapError> {
        self.command("NOOP").await.map(|_| ())
    }

    pub async fn logout(&mut self) -> Result<(), ImapError> {
        match self.command("LOGOUT").await {
            Ok(_) | Err(ImapError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn command(&mut self, command: &str) -> Result<Vec<Untagged>, ImapError> {
        self.next_tag += 1;
        let tag = format!("A{:04}", self.next_tag);
        let verb = command.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

        if verb.starts_with("LOGIN") {
            debug!(tag = %tag, "IMAP > LOGIN <redacted>");
        } else {
            debug!(tag = %tag, command = %command, "IMAP >");
        }

        tokio::time::timeout(self.timeout, self.exchange(&tag, command))
            .await
            .map_err(|_| ImapError::Timeout(verb))?
    }

    async fn exchange(&mut self, tag: &str, command: &str) -> Result<Vec<Untagged>, ImapError> {
        let line = format!("{} {}\r\n", tag, command);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;

        let mut untagged = Vec::new();
        loop {
            let (text, literals, oversized) = self.read_logical_line().await?;

            if let Some(rest) = text.strip_prefix("* ") {
                untagged.push(Untagged {
                    text: rest.to_string(),
                    literals,
                    oversized,
                });
                continue;
            }

            let Some(rest) = text.strip_prefix(tag).and_then(|r| r.strip_prefix(' ')) else {
                debug!(line = %text, "Ignoring unexpected IMAP line");
                continue;
            };

            let (status, detail) = rest.split_once(' ').unwrap_or((rest, ""));
            return match status.to_ascii_uppercase().as_str() {
                "OK" => Ok(untagged),
                "NO" | "BAD" => Err(ImapError::Rejected(format!("{} {}", status, detail))),
                _ => Err(ImapError::Protocol(format!("bad completion: {}", text))),
            };
        }
    }

    /// Read one response line, inlining any `{n}` literals it announces.
    ///
    /// Literals over the size limit are drained from the stream and
    /// only their size is kept.
    async fn read_logical_line(
        &mut self,
    ) -> Result<(String, Vec<Vec<u8>>, Option<usize>), ImapError> {
        let mut text = String::new();
        let mut literals = Vec::new();
        let mut oversized = None;

        loop {
            let mut buf = Vec::new();
            if self.stream.read_until(b'\n', &mut buf).await? == 0 {
                return Err(ImapError::Closed);
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }

            let line = String::from_utf8_lossy(&buf);
            text.push_str(&line);

            let Some(len) = literal_len(&line) else {
                return Ok((text, literals, oversized));
            };
            if len > self.max_literal {
                let drained =
                    tokio::io::copy(&mut (&mut self.stream).take(len as u64), &mut tokio::io::sink())
                        .await?;
                if drained < len as u64 {
                    return Err(ImapError::Closed);
                }
                warn!(bytes = len, "Discarded oversized IMAP literal");
                oversized = Some(len);
                continue;
            }

            let mut literal = vec![0; len];
            self.stream.read_exact(&mut literal).await?;
            literals.push(literal);
        }
    }
}

/// Quote an IMAP string argument.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Length of the literal announced at the end of `line`, e.g. `{42}`.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &text[keyword.len()..];
    (rest.is_empty() || rest.starts_with(' ')).then_some(rest)
}

fn uid_validity(text: &str) -> Option<u32> {
    let upper = text.to_ascii_uppercase();
    let start = upper.find("[UIDVALIDITY ")? + "[UIDVALIDITY ".len();
    let end = upper[start..].find(']')? + start;
    text[start..end].trim().parse().ok()
}

fn fetch_uid(text: &str) -> Option<u32> {
    let mut tokens = text
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|t| !t.is_empty());
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("UID") {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Byte stream an IMAP session can run over.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ImapStream for T {}

pub type BoxedImapStream = Box<dyn ImapStream>;

/// Opens the transport for a new session.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    async fn connect(&self) -> Result<BoxedImapStream, ImapError>;
}

/// Implicit-TLS connector (port 993) trusting the platform root store.
pub struct TlsImapConnector {
    host: String,
    port: u16,
    timeout: Duration,
    tls: TlsConnector,
}

impl TlsImapConnector {
    /// # Errors
    ///
    /// Returns [`ImapError::Tls`] if the native root certificates cannot be
    /// loaded.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ImapError> {
        let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();

        let certs = rustls_native_certs::load_native_certs()
            .map_err(|e| ImapError::Tls(format!("failed to load native certificates: {}", e)))?;
        let mut root_cert_store = RootCertStore::empty();
        let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
        debug!(added, ignored, "Loaded native root certificates");

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
            tls: TlsConnector::from(Arc::new(tls_config)),
        })
    }
}

#[async_trait]
impl ImapConnector for TlsImapConnector {
    async fn connect(&self) -> Result<BoxedImapStream, ImapError> {
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| ImapError::Tls(format!("invalid server name {}: {}", self.host, e)))?;

        debug!(host = %self.host, port = self.port, "Connecting to IMAP server");
        let connect = async {
            let tcp_stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            let stream = self.tls.connect(server_name, tcp_stream).await?;
            Ok::<BoxedImapStream, ImapError>(Box::new(stream))
        };

        tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| ImapError::Timeout("connection".to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Sequential source
// ---------------------------------------------------------------------------

/// IMAP folder exposed as a [`SequentialSource`].
pub struct ImapMailbox<C = TlsImapConnector> {
    connector: C,
    login: LoginParams,
    session: Option<ImapSession<BoxedImapStream>>,
}

struct LoginParams {
    username: String,
    password: String,
    folder: String,
    timeout: Duration,
}

impl ImapMailbox<TlsImapConnector> {
    /// Build a TLS-backed mailbox from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ImapError::Tls`] if the TLS client cannot be set up
    pub fn new(config: &MailboxConfig) -> Result<Self, ImapError> {
        let timeout = Duration::from_secs(config.command_timeout_secs);
        let connector = TlsImapConnector::new(&config.server, config.port, timeout)?;
        Ok(Self::with_connector(connector, config))
    }
}

impl<C: ImapConnector> ImapMailbox<C> {
    pub fn with_connector(connector: C, config: &MailboxConfig) -> Self {
        Self {
            connector,
            login: LoginParams {
                username: config.username.clone(),
                password: config.password.clone(),
                folder: config.folder.clone(),
                timeout: Duration::from_secs(config.command_timeout_secs),
            },
            session: None,
        }
    }

    /// Drop the broken session and classify the error.
    fn fail(&mut self, error: ImapError) -> SourceError {
        self.session = None;
        transient(error)
    }
}

async fn open<C: ImapConnector>(
    connector: &C,
    login: &LoginParams,
) -> Result<(ImapSession<BoxedImapStream>, Option<u32>), SourceError> {
    let stream = connector.connect().await.map_err(transient)?;
    let mut session = ImapSession::new(stream, login.timeout);
    session.start().await.map_err(transient)?;

    session
        .login(&login.username, &login.password)
        .await
        .map_err(|e| match e {
            ImapError::Rejected(detail) => SourceError::Auth(detail),
            other => transient(other),
        })?;

    let uid_validity = session.select(&login.folder).await.map_err(transient)?;
    Ok((session, uid_validity))
}

fn transient(error: ImapError) -> SourceError {
    SourceError::Transient(error.to_string())
}

fn not_connected() -> SourceError {
    SourceError::Transient("no IMAP session".to_string())
}

/// Messages read in one pass.
struct Batch {
    items: Vec<FetchedMail>,
    /// The session can no longer be trusted and must be reopened
    resync: bool,
}

/// Fetch every message above `last`.
///
/// A message the server refuses or that exceeds the size limit becomes a
/// [`FetchedMail::Malformed`] marker and the batch goes on. An unintelligible
/// answer also marks the message, but ends the batch and asks for a new
/// session. I/O errors, timeouts and a closed connection fail the batch.
async fn fetch_messages(
    session: &mut ImapSession<BoxedImapStream>,
    last: u32,
) -> Result<Batch, ImapError> {
    let mut uids = session
        .uid_search(&format!("UID {}:*", last.saturating_add(1)))
        .await?;
    uids.retain(|uid| *uid > last);
    uids.sort_unstable();
    uids.dedup();

    let mut items = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetched = match session.uid_fetch_message(uid).await {
            Ok(fetched) => fetched,
            Err(e @ (ImapError::Rejected(_) | ImapError::TooLarge(_))) => {
                warn!(uid, error = %e, "Message unavailable, skipping");
                items.push(FetchedMail::Malformed {
                    uid,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e @ ImapError::Protocol(_)) => {
                warn!(uid, error = %e, "Unreadable FETCH response, skipping and reconnecting");
                items.push(FetchedMail::Malformed {
                    uid,
                    reason: e.to_string(),
                });
                return Ok(Batch {
                    items,
                    resync: true,
                });
            }
            Err(e) => return Err(e),
        };

        let item = match fetched {
            Some(raw) => {
                let parsed = parse_message(&raw);
                FetchedMail::Parsed(MailItem {
                    uid,
                    subject: parsed.subject,
                    sender: parsed.from,
                    received_at: parsed.date,
                    body: parsed.body,
                })
            }
            None => FetchedMail::Malformed {
                uid,
                reason: "server returned no message body".to_string(),
            },
        };
        items.push(item);
    }

    Ok(Batch {
        items,
        resync: false,
    })
}

#[async_trait]
impl<C: ImapConnector> SequentialSource for ImapMailbox<C> {
    async fn connect(&mut self) -> Result<SessionInfo, SourceError> {
        if let Some(mut old) = self.session.take() {
            if let Err(e) = old.logout().await {
                debug!(error = %e, "Ignoring LOGOUT failure on stale session");
            }
        }

        let (session, uid_validity) = open(&self.connector, &self.login).await?;
        debug!(folder = %self.login.folder, uid_validity = ?uid_validity, "IMAP folder selected");
        self.session = Some(session);

        Ok(SessionInfo { uid_validity })
    }

    async fn baseline(&mut self) -> Result<Option<u32>, SourceError> {
        let result = match self.session.as_mut() {
            Some(session) => session.uid_search("ALL").await,
            None => return Err(not_connected()),
        };
        result
            .map(|uids| uids.into_iter().max())
            .map_err(|e| self.fail(e))
    }

    async fn fetch_since(&mut self, last: u32) -> Result<Vec<FetchedMail>, SourceError> {
        let result = match self.session.as_mut() {
            Some(session) => fetch_messages(session, last).await,
            None => return Err(not_connected()),
        };
        match result {
            Ok(batch) => {
                if batch.resync {
                    self.session = None;
                }
                Ok(batch.items)
            }
            Err(e) => {
                warn!(error = %e, "IMAP fetch failed");
                Err(self.fail(e))
            }
        }
    }

    async fn keepalive(&mut self) -> Result<(), SourceError> {
        let result = match self.session.as_mut() {
            Some(session) => session.noop().await,
            None => return Err(not_connected()),
        };
        result.map_err(|e| self.fail(e))
    }
}
