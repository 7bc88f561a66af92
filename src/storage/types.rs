use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Persisted watermark of the mailbox engine.
///
/// `last_uid == None` means no baseline has been established yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxCursor {
    /// Highest UID already processed
    #[serde(default)]
    pub last_uid: Option<u32>,
    /// UIDVALIDITY of the folder the cursor belongs to
    #[serde(default)]
    pub uid_validity: Option<u32>,
    /// When the cursor last moved
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MailboxCursor {
    /// Moves the watermark forward to `uid`. Never moves it backwards.
    ///
    /// Returns `true` when the cursor changed.
    pub fn advance(&mut self, uid: u32) -> bool {
        match self.last_uid {
            Some(current) if current >= uid => false,
            _ => {
                self.last_uid = Some(uid);
                self.updated_at = Some(Utc::now());
                true
            }
        }
    }

    /// Returns `true` when `uid` is at or below the watermark.
    pub fn covers(&self, uid: u32) -> bool {
        self.last_uid.is_some_and(|last| uid <= last)
    }
}

/// Memory of the last failure notified for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Refresh request id that was last notified
    #[serde(alias = "last_failed_request_id", deserialize_with = "null_as_empty")]
    pub last_notified_key: String,
    /// When the notification went out
    #[serde(default = "Utc::now")]
    pub last_notified_at: DateTime<Utc>,
    /// Dataset display name at notification time
    #[serde(default)]
    pub dataset_name: String,
    /// Workspace display name at notification time
    #[serde(default)]
    pub workspace_name: String,
    /// Failure time as shown in the alert
    #[serde(default)]
    pub fail_time: String,
}

// Older state files store `null` when the API omitted the request id.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Persisted state of the workspace engine, keyed by dataset id.
///
/// Records are read one by one: an unreadable record is dropped with a
/// warning and the others are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DedupState(BTreeMap<String, DedupRecord>);

impl Deref for DedupState {
    type Target = BTreeMap<String, DedupRecord>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DedupState {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de> Deserialize<'de> for DedupState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;

        let mut records = BTreeMap::new();
        for (dataset_id, value) in raw {
            match serde_json::from_value::<DedupRecord>(value) {
                Ok(record) => {
                    records.insert(dataset_id, record);
                }
                Err(e) => warn!(
                    dataset_id = %dataset_id,
                    error = %e,
                    "Dropping unreadable dedup record"
                ),
            }
        }

        Ok(Self(records))
    }
}
