//! Poller state machine shared by both engines

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{Verdict, Watch};
use crate::notifier::Notifier;
use crate::source::SourceError;
use crate::storage::JsonStateStore;

/// Where the poller currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Listening,
    Fetching,
    Evaluating,
    Notifying,
    Checkpointing,
    Sleeping,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connecting => "connecting",
            Phase::Listening => "listening",
            Phase::Fetching => "fetching",
            Phase::Evaluating => "evaluating",
            Phase::Notifying => "notifying",
            Phase::Checkpointing => "checkpointing",
            Phase::Sleeping => "sleeping",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items returned by the source
    pub fetched: usize,
    /// Alerts handed to the notifier
    pub notified: usize,
    /// Alert candidates suppressed as already notified
    pub duplicates: usize,
    /// Items that could not be evaluated
    pub skipped: usize,
}

/// Drives a [`Watch`] through connect, fetch, evaluate, notify, checkpoint.
///
/// Every alert is handed to the notifier before the corresponding
/// checkpoint is recorded, so a crash between the two re-notifies rather
/// than loses the alert.
pub struct Poller<W: Watch> {
    watch: W,
    store: JsonStateStore<W::State>,
    state: W::State,
    notifier: Arc<dyn Notifier>,
    phase: Phase,
    dirty: bool,
}

impl<W: Watch> Poller<W> {
    /// Create a poller, loading persisted state from `store`.
    pub fn new(watch: W, store: JsonStateStore<W::State>, notifier: Arc<dyn Notifier>) -> Self {
        let state = store.load();
        Self {
            watch,
            store,
            state,
            notifier,
            phase: Phase::Connecting,
            dirty: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// In-memory state, including changes not yet persisted
    pub fn state(&self) -> &W::State {
        &self.state
    }

    /// The engine driven by this poller
    pub fn watch(&self) -> &W {
        &self.watch
    }

    /// Establish the source session.
    ///
    /// # Errors
    ///
    /// Returns the source error; the poller stays in [`Phase::Connecting`].
    pub async fn connect(&mut self) -> Result<(), SourceError> {
        self.phase = Phase::Connecting;

        if self.watch.connect(&mut self.state).await? {
            self.dirty = true;
            self.persist();
        }

        self.phase = Phase::Listening;
        Ok(())
    }

    /// Run one listen/fetch/evaluate/notify/checkpoint pass.
    ///
    /// # Errors
    ///
    /// Returns the first source error raised while listening or fetching.
    /// State checkpointed before the error is kept.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SourceError> {
        self.phase = Phase::Listening;
        self.watch.listen().await?;

        self.phase = Phase::Fetching;
        let items = self.watch.fetch(&self.state).await?;

        let mut report = CycleReport {
            fetched: items.len(),
            ..CycleReport::default()
        };

        for item in &items {
            self.phase = Phase::Evaluating;
            let verdict = self.watch.evaluate(item, &self.state);

            match &verdict {
                Verdict::Ignore => {}
                Verdict::Duplicate => {
                    report.duplicates += 1;
                    debug!(engine = self.watch.name(), "Already notified, skipping");
                }
                Verdict::Skip(reason) => {
                    report.skipped += 1;
                    warn!(engine = self.watch.name(), reason = %reason, "Skipping unreadable item");
                }
                Verdict::Notify(text) => {
                    self.phase = Phase::Notifying;
                    self.notifier.send(text).await;
                    report.notified += 1;
                }
            }

            self.phase = Phase::Checkpointing;
            if self.watch.checkpoint(item, &verdict, &mut self.state) {
                self.dirty = true;
                if self.watch.persist_each_item() {
                    self.persist();
                }
            }
        }

        self.flush();
        Ok(report)
    }

    /// Perform one step of the loop and return how long to sleep next.
    pub async fn step(&mut self) -> Duration {
        let timing = self.watch.timing();
        let name = self.watch.name();

        if self.phase == Phase::Connecting {
            if let Err(e) = self.connect().await {
                warn!(
                    engine = name,
                    error = %e,
                    retry_in_secs = timing.backoff.as_secs(),
                    "Connection failed"
                );
                return timing.backoff;
            }
            info!(engine = name, "Connected");
        }

        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    engine = name,
                    fetched = report.fetched,
                    notified = report.notified,
                    duplicates = report.duplicates,
                    skipped = report.skipped,
                    "Cycle complete"
                );
                self.phase = Phase::Sleeping;
                timing.interval
            }
            Err(e) => {
                self.flush();
                if let Some(alert) = self.watch.failure_alert(&e) {
                    self.notifier.send(&alert).await;
                }

                if e.is_transient() {
                    warn!(
                        engine = name,
                        error = %e,
                        retry_in_secs = timing.backoff.as_secs(),
                        "Cycle interrupted, reconnecting"
                    );
                    self.phase = Phase::Connecting;
                    timing.backoff
                } else {
                    error!(engine = name, error = %e, "Cycle failed");
                    self.phase = Phase::Sleeping;
                    timing.interval
                }
            }
        }
    }

    /// Loop forever. Cancel the future to stop, then call [`Poller::shutdown`].
    pub async fn run(&mut self) {
        let timing = self.watch.timing();
        info!(
            engine = self.watch.name(),
            interval_secs = timing.interval.as_secs(),
            state_file = %self.store.path().display(),
            "Starting poller"
        );

        loop {
            let delay = self.step().await;
            debug!(engine = self.watch.name(), phase = %self.phase, secs = delay.as_secs(), "Sleeping");
            tokio::time::sleep(delay).await;
        }
    }

    /// Flush pending state and mark the poller terminated.
    pub fn shutdown(&mut self) {
        self.flush();
        self.phase = Phase::Terminated;
        info!(engine = self.watch.name(), "Poller stopped");
    }

    fn flush(&mut self) {
        if self.dirty {
            self.persist();
        }
    }

    fn persist(&mut self) {
        match self.store.save(&self.state) {
            Ok(()) => self.dirty = false,
            Err(e) => warn!(
                engine = self.watch.name(),
                error = %e,
                "Failed to persist state, keeping it in memory"
            ),
        }
    }
}
