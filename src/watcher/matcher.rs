//! Item matching for both engines
//!
//! Decides which fetched items are alert candidates: mail subjects for the
//! mailbox engine, refresh statuses for the workspace engine.

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

/// Subject filter for the mailbox engine.
///
/// A subject matches when it contains the configured needle, compared
/// case-insensitively, or when it matches the optional regex.
#[derive(Clone, Debug)]
pub struct SubjectMatcher {
    needle: String,
    pattern: Option<Arc<Regex>>,
}

impl SubjectMatcher {
    /// Create a new subject matcher.
    ///
    /// # Arguments
    ///
    /// * `needle` - Substring searched for, case-insensitively
    /// * `pattern` - Optional regex checked in addition to the needle
    ///
    /// # Returns
    ///
    /// Returns the matcher or error if regex compilation fails
    ///
    /// # Examples
    ///
    /// ```
    /// use biwatch::watcher::SubjectMatcher;
    ///
    /// let matcher = SubjectMatcher::new("Erro no BI:", None).unwrap();
    /// assert!(matcher.matches("RE: ERRO NO BI: carga de vendas"));
    /// assert!(!matcher.matches("Relatório semanal"));
    /// ```
    pub fn new(needle: &str, pattern: Option<&str>) -> Result<Self> {
        let pattern = match pattern {
            Some(p) => Some(Arc::new(Regex::new(p)?)),
            None => None,
        };

        Ok(Self {
            needle: needle.trim().to_lowercase(),
            pattern,
        })
    }

    /// Check whether a subject is an alert subject.
    pub fn matches(&self, subject: &str) -> bool {
        if !self.needle.is_empty() && subject.to_lowercase().contains(&self.needle) {
            return true;
        }

        self.pattern
            .as_ref()
            .is_some_and(|regex| regex.is_match(subject))
    }

    /// Get matcher summary for logging.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.needle.is_empty() {
            parts.push(format!("contains: {:?}", self.needle));
        }
        if let Some(regex) = &self.pattern {
            parts.push(format!("pattern: {}", regex.as_str()));
        }

        if parts.is_empty() {
            "nothing".to_string()
        } else {
            parts.join(" or ")
        }
    }
}

/// Status filter for the workspace engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMatcher {
    failure_status: String,
}

impl StatusMatcher {
    /// Create a matcher for the given failure status.
    pub fn new(failure_status: impl Into<String>) -> Self {
        Self {
            failure_status: failure_status.into(),
        }
    }

    /// Exact, case-sensitive comparison against the failure status.
    pub fn matches(&self, status: &str) -> bool {
        status == self.failure_status
    }

    /// The status this matcher looks for
    pub fn failure_status(&self) -> &str {
        &self.failure_status
    }
}
