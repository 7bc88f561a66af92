//! Workspace engine: latest refresh per dataset, deduplicated by request id

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::format::{cycle_failure_alert, display_time, refresh_alert};
use super::{PollTiming, StatusMatcher, Verdict, Watch};
use crate::config::WorkspacesConfig;
use crate::source::{DatasetRef, KeyedSource, RefreshOccurrence, SourceError};
use crate::storage::{DedupRecord, DedupState};

/// The latest refresh of one dataset, or why it could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCheck {
    pub dataset: DatasetRef,
    pub latest: std::result::Result<Option<RefreshOccurrence>, String>,
}

/// Watches every reachable dataset for a new failed refresh.
pub struct WorkspaceWatch<S> {
    source: S,
    matcher: StatusMatcher,
    interval: Duration,
    max_error_chars: usize,
    utc_offset_hours: i32,
    notify_cycle_errors: bool,
}

impl<S: KeyedSource> WorkspaceWatch<S> {
    pub fn new(source: S, config: &WorkspacesConfig) -> Self {
        Self {
            source,
            matcher: StatusMatcher::new(config.failure_status.clone()),
            interval: Duration::from_secs(config.poll_interval_secs),
            max_error_chars: config.max_error_chars,
            utc_offset_hours: config.display_utc_offset_hours,
            notify_cycle_errors: config.notify_cycle_errors,
        }
    }

    /// The underlying source
    pub fn source(&self) -> &S {
        &self.source
    }

    fn fail_time(&self, refresh: &RefreshOccurrence) -> String {
        display_time(refresh.end_time.as_deref().unwrap_or_default(), self.utc_offset_hours)
    }
}

fn request_id(refresh: &RefreshOccurrence) -> Option<&str> {
    refresh
        .request_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
}

#[async_trait]
impl<S: KeyedSource> Watch for WorkspaceWatch<S> {
    type State = DedupState;
    type Item = RefreshCheck;

    fn name(&self) -> &'static str {
        "workspaces"
    }

    fn timing(&self) -> PollTiming {
        PollTiming {
            interval: self.interval,
            backoff: self.interval,
        }
    }

    async fn connect(&mut self, _state: &mut DedupState) -> Result<bool, SourceError> {
        // Credentials are acquired per cycle in `fetch`.
        Ok(false)
    }

    async fn fetch(&mut self, _state: &DedupState) -> Result<Vec<RefreshCheck>, SourceError> {
        self.source.authenticate().await?;
        let datasets = self.source.list_entities().await?;
        debug!(count = datasets.len(), "Datasets to check");

        let mut checks = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let latest = match self.source.fetch_latest(&dataset).await {
                Ok(latest) => Ok(latest),
                Err(SourceError::Malformed(reason)) => Err(reason),
                Err(e) => return Err(e),
            };
            checks.push(RefreshCheck { dataset, latest });
        }

        Ok(checks)
    }

    fn evaluate(&self, check: &RefreshCheck, state: &DedupState) -> Verdict {
        let dataset = &check.dataset;
        let refresh = match &check.latest {
            Err(reason) => {
                return Verdict::Skip(format!("dataset {}: {}", dataset.dataset_name, reason))
            }
            Ok(None) => return Verdict::Ignore,
            Ok(Some(refresh)) => refresh,
        };

        if !self.matcher.matches(&refresh.status) {
            return Verdict::Ignore;
        }

        let Some(key) = request_id(refresh) else {
            return Verdict::Skip(format!(
                "dataset {}: failed refresh without requestId",
                dataset.dataset_name
            ));
        };

        if state
            .get(&dataset.dataset_id)
            .is_some_and(|record| record.last_notified_key == key)
        {
            return Verdict::Duplicate;
        }

        info!(
            workspace = %dataset.workspace_name,
            dataset = %dataset.dataset_name,
            request_id = key,
            "New refresh failure"
        );
        Verdict::Notify(refresh_alert(
            dataset,
            refresh,
            &self.fail_time(refresh),
            self.max_error_chars,
        ))
    }

    fn checkpoint(&self, check: &RefreshCheck, verdict: &Verdict, state: &mut DedupState) -> bool {
        if !matches!(verdict, Verdict::Notify(_)) {
            return false;
        }
        let Ok(Some(refresh)) = &check.latest else {
            return false;
        };
        let Some(key) = request_id(refresh) else {
            return false;
        };

        state.insert(
            check.dataset.dataset_id.clone(),
            DedupRecord {
                last_notified_key: key.to_string(),
                last_notified_at: Utc::now(),
                dataset_name: check.dataset.dataset_name.clone(),
                workspace_name: check.dataset.workspace_name.clone(),
                fail_time: self.fail_time(refresh),
            },
        );
        true
    }

    fn persist_each_item(&self) -> bool {
        false
    }

    fn failure_alert(&self, error: &SourceError) -> Option<String> {
        if !self.notify_cycle_errors {
            return None;
        }
        warn!(error = %error, "Reporting failed cycle");
        Some(cycle_failure_alert(self.name(), &error.to_string()))
    }
}
