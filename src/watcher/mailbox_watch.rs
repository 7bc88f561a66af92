//! Mailbox engine: UID watermark over a sequential source

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::format::mail_alert;
use super::{PollTiming, SubjectMatcher, Verdict, Watch};
use crate::config::MailboxConfig;
use crate::source::{FetchedMail, SequentialSource, SourceError};
use crate::storage::MailboxCursor;

/// Watches a mailbox for alert subjects newer than the persisted watermark.
///
/// On a cold start the watermark is set to the newest UID present, so mail
/// that predates the first run is never alerted on. If the folder's
/// UIDVALIDITY changes, the old watermark is meaningless and a new baseline
/// is taken.
pub struct MailboxWatch<S> {
    source: S,
    matcher: SubjectMatcher,
    timing: PollTiming,
    max_body_chars: usize,
    fresh_session: bool,
}

impl<S: SequentialSource> MailboxWatch<S> {
    /// Create a mailbox watch over `source`.
    ///
    /// # Errors
    ///
    /// Returns error if `subject_pattern` is not a valid regex
    pub fn new(source: S, config: &MailboxConfig) -> Result<Self> {
        let matcher = SubjectMatcher::new(&config.subject_filter, config.subject_pattern.as_deref())?;
        debug!(filter = %matcher.summary(), "Mailbox subject filter");

        Ok(Self {
            source,
            matcher,
            timing: PollTiming {
                interval: Duration::from_secs(config.poll_interval_secs),
                backoff: Duration::from_secs(config.reconnect_backoff_secs),
            },
            max_body_chars: config.max_body_chars,
            fresh_session: false,
        })
    }

    /// The underlying source
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: SequentialSource> Watch for MailboxWatch<S> {
    type State = MailboxCursor;
    type Item = FetchedMail;

    fn name(&self) -> &'static str {
        "mailbox"
    }

    fn timing(&self) -> PollTiming {
        self.timing
    }

    async fn connect(&mut self, cursor: &mut MailboxCursor) -> Result<bool, SourceError> {
        let session = self.source.connect().await?;
        self.fresh_session = true;
        let mut changed = false;

        if let Some(validity) = session.uid_validity {
            if cursor.uid_validity.is_some_and(|old| old != validity) {
                warn!(
                    old = ?cursor.uid_validity,
                    new = validity,
                    "UIDVALIDITY changed, discarding watermark"
                );
                cursor.last_uid = None;
            }
            if cursor.uid_validity != Some(validity) {
                cursor.uid_validity = Some(validity);
                changed = true;
            }
        }

        if cursor.last_uid.is_none() {
            let top = self.source.baseline().await?.unwrap_or(0);
            cursor.advance(top);
            changed = true;
            info!(uid = top, "Baseline established, older mail will not be alerted");
        }

        Ok(changed)
    }

    async fn listen(&mut self) -> Result<(), SourceError> {
        if std::mem::take(&mut self.fresh_session) {
            return Ok(());
        }
        self.source.keepalive().await
    }

    async fn fetch(&mut self, cursor: &MailboxCursor) -> Result<Vec<FetchedMail>, SourceError> {
        let last = cursor.last_uid.unwrap_or(0);
        let mut items = self.source.fetch_since(last).await?;

        // `UID SEARCH UID n:*` always returns the highest UID, even when <= n.
        items.retain(|item| !cursor.covers(item.uid()));
        items.sort_by_key(FetchedMail::uid);
        items.dedup_by_key(|item| item.uid());

        if !items.is_empty() {
            debug!(count = items.len(), after_uid = last, "New mail");
        }
        Ok(items)
    }

    fn evaluate(&self, item: &FetchedMail, _cursor: &MailboxCursor) -> Verdict {
        match item {
            FetchedMail::Malformed { uid, reason } => {
                Verdict::Skip(format!("UID {}: {}", uid, reason))
            }
            FetchedMail::Parsed(mail) if self.matcher.matches(&mail.subject) => {
                info!(uid = mail.uid, subject = %mail.subject, sender = %mail.sender, "Alert mail detected");
                Verdict::Notify(mail_alert(mail, self.max_body_chars))
            }
            FetchedMail::Parsed(mail) => {
                debug!(uid = mail.uid, subject = %mail.subject, "Ignoring mail");
                Verdict::Ignore
            }
        }
    }

    fn checkpoint(&self, item: &FetchedMail, _verdict: &Verdict, cursor: &mut MailboxCursor) -> bool {
        cursor.advance(item.uid())
    }

    fn persist_each_item(&self) -> bool {
        true
    }
}
