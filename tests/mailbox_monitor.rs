use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use biwatch::config::MailboxConfig;
use biwatch::mailbox::imap::BoxedImapStream;
use biwatch::mailbox::{ImapConnector, ImapError, ImapMailbox};
use biwatch::storage::{JsonStateStore, MailboxCursor};
use biwatch::watcher::{MailboxWatch, Phase, Poller};

mod common;
use common::RecordingNotifier;

type MailboxPoller = Poller<MailboxWatch<ImapMailbox<PlainConnector>>>;

/// Messages held by the fake server, by UID.
#[derive(Clone, Default)]
struct FakeFolder {
    messages: Arc<Mutex<Vec<(u32, String)>>>,
    logins: Arc<Mutex<usize>>,
}

impl FakeFolder {
    fn deliver(&self, uid: u32, subject: &str, body: &str) {
        let raw = format!(
            "From: Power BI <noreply@example.com>\r\nSubject: {}\r\nDate: Sat, 01 Mar 2025 10:00:00 -0300\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            subject, body
        );
        self.messages.lock().unwrap().push((uid, raw));
    }

    fn uids(&self) -> Vec<u32> {
        self.messages.lock().unwrap().iter().map(|(uid, _)| *uid).collect()
    }

    fn message(&self, uid: u32) -> Option<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| *u == uid)
            .map(|(_, raw)| raw.clone())
    }

    fn logins(&self) -> usize {
        *self.logins.lock().unwrap()
    }

    /// Answer one client command.
    fn respond(&self, tag: &str, command: &str) -> String {
        let upper = command.to_ascii_uppercase();

        if upper.starts_with("LOGIN") {
            *self.logins.lock().unwrap() += 1;
            format!("{} OK LOGIN completed\r\n", tag)
        } else if upper.starts_with("SELECT") {
            format!(
                "* {} EXISTS\r\n* OK [UIDVALIDITY 7] UIDs valid\r\n{} OK [READ-WRITE] SELECT completed\r\n",
                self.uids().len(),
                tag
            )
        } else if upper == "UID SEARCH ALL" {
            format!("{}{} OK SEARCH completed\r\n", search_line(&self.uids()), tag)
        } else if let Some(range) = upper.strip_prefix("UID SEARCH UID ") {
            let from: u32 = range.trim_end_matches(":*").parse().unwrap_or(1);
            let uids = self.uids();
            let mut found: Vec<u32> = uids.iter().copied().filter(|uid| *uid >= from).collect();
            // n:* always includes the highest UID
            if found.is_empty() {
                found.extend(uids.iter().max());
            }
            format!("{}{} OK SEARCH completed\r\n", search_line(&found), tag)
        } else if let Some(rest) = upper.strip_prefix("UID FETCH ") {
            let uid: u32 = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            match self.message(uid) {
                Some(raw) => format!(
                    "* 1 FETCH (UID {} BODY[] {{{}}}\r\n{})\r\n{} OK FETCH completed\r\n",
                    uid,
                    raw.len(),
                    raw,
                    tag
                ),
                None => format!("{} OK FETCH completed\r\n", tag),
            }
        } else if upper == "NOOP" {
            format!("{} OK NOOP completed\r\n", tag)
        } else if upper == "LOGOUT" {
            format!("* BYE logging out\r\n{} OK LOGOUT completed\r\n", tag)
        } else {
            format!("{} BAD unknown command\r\n", tag)
        }
    }
}

fn search_line(uids: &[u32]) -> String {
    let list: Vec<String> = uids.iter().map(u32::to_string).collect();
    if list.is_empty() {
        "* SEARCH\r\n".to_string()
    } else {
        format!("* SEARCH {}\r\n", list.join(" "))
    }
}

async fn serve_connection(stream: TcpStream, folder: FakeFolder) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read);
    if write.write_all(b"* OK fake IMAP ready\r\n").await.is_err() {
        return;
    }

    loop {
        let mut line = String::new();
        match lines.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end();
        let Some((tag, command)) = line.split_once(' ') else {
            continue;
        };
        let response = folder.respond(tag, command);
        if write.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn start_server(folder: FakeFolder) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, folder.clone()));
        }
    });
    addr
}

/// Connects over plain TCP.
struct PlainConnector {
    addr: SocketAddr,
}

#[async_trait]
impl ImapConnector for PlainConnector {
    async fn connect(&self) -> Result<BoxedImapStream, ImapError> {
        let stream = TcpStream::connect(self.addr).await?;
        Ok(Box::new(stream))
    }
}

fn mailbox_config() -> MailboxConfig {
    MailboxConfig {
        server: "127.0.0.1".to_string(),
        username: "alerts@example.com".to_string(),
        password: "secret".to_string(),
        command_timeout_secs: 5,
        ..MailboxConfig::default()
    }
}

fn poller(addr: SocketAddr, dir: &TempDir, notifier: &RecordingNotifier) -> MailboxPoller {
    let config = mailbox_config();
    let source = ImapMailbox::with_connector(PlainConnector { addr }, &config);
    let watch = MailboxWatch::new(source, &config).unwrap();
    let store = JsonStateStore::<MailboxCursor>::new(dir.path().join("mailbox_state.json"));
    Poller::new(watch, store, Arc::new(notifier.clone()))
}

/// Mail present before the first run is baselined, newer alert mail is sent once
#[tokio::test]
async fn test_new_alert_mail_is_notified_once() {
    let folder = FakeFolder::default();
    folder.deliver(1, "Erro no BI: carga antiga", "old failure");
    let addr = start_server(folder.clone()).await;
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let mut poller = poller(addr, &dir, &notifier);

    poller.connect().await.unwrap();
    assert_eq!(poller.state().last_uid, Some(1));
    assert_eq!(poller.state().uid_validity, Some(7));

    folder.deliver(2, "ERRO NO BI: dataset vendas", "Refresh failed at 10:00");
    folder.deliver(3, "Weekly newsletter", "nothing to see");

    let report = poller.run_cycle().await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.notified, 1);
    assert_eq!(poller.state().last_uid, Some(3));

    let again = poller.run_cycle().await.unwrap();
    assert_eq!(again.fetched, 0);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("POWER BI ERROR ALERT"));
    assert!(messages[0].contains("ERRO NO BI: dataset vendas"));
    assert!(messages[0].contains("Refresh failed at 10:00"));
}

/// A restarted poller resumes from the persisted watermark
#[tokio::test]
async fn test_restart_resumes_from_watermark() {
    let folder = FakeFolder::default();
    folder.deliver(10, "Erro no BI: primeiro", "one");
    let addr = start_server(folder.clone()).await;
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();

    {
        let mut poller = poller(addr, &dir, &notifier);
        poller.connect().await.unwrap();
        poller.shutdown();
        assert_eq!(poller.phase(), Phase::Terminated);
    }

    folder.deliver(11, "Erro no BI: segundo", "two");

    let mut restarted = poller(addr, &dir, &notifier);
    assert_eq!(restarted.state().last_uid, Some(10));
    let delay = restarted.step().await;

    assert_eq!(delay, Duration::from_secs(60));
    assert_eq!(restarted.phase(), Phase::Sleeping);
    assert_eq!(restarted.state().last_uid, Some(11));
    assert_eq!(folder.logins(), 2);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Erro no BI: segundo"));
}

/// An unreachable server keeps the poller reconnecting after the backoff
#[tokio::test]
async fn test_unreachable_server_backs_off() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let mut poller = poller(addr, &dir, &notifier);

    let delay = poller.step().await;

    assert_eq!(delay, Duration::from_secs(60));
    assert_eq!(poller.phase(), Phase::Connecting);
    assert!(notifier.messages().is_empty());
}
