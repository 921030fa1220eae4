use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;

/// A message mirrored from the remote mailbox into local storage.
///
/// Created unanalyzed by the sync engine, classified in place exactly once
/// by the classification engine, and removed by the reconciliation engine
/// after a confirmed remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Opaque mailbox-assigned message id, unique per user
    pub id: String,
    /// Owner of the local mirror this message belongs to
    pub user_id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    /// Parsed from the Date header; falls back to ingestion time
    pub date: DateTime<Utc>,
    pub is_analyzed: bool,
    pub category: Option<String>,
    pub suggested_action: Option<SuggestedAction>,
    pub reasoning: Option<String>,
}

impl StoredMessage {
    /// Build an unanalyzed mirror record from gateway metadata.
    ///
    /// A missing or unparsable Date header falls back to the current time
    /// rather than failing ingestion.
    pub fn from_remote(user_id: &str, remote: RemoteMessage) -> Self {
        Self {
            id: remote.id,
            user_id: user_id.to_string(),
            from: remote.from,
            subject: remote.subject,
            snippet: remote.snippet,
            date: remote.date.unwrap_or_else(Utc::now),
            is_analyzed: false,
            category: None,
            suggested_action: None,
            reasoning: None,
        }
    }
}

/// Metadata for one message as returned by the mailbox gateway
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    /// None when the Date header is missing or unparsable
    pub date: Option<DateTime<Utc>>,
}

/// One page of message ids from the mailbox listing
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub ids: Vec<String>,
    /// Absent when no further history exists
    pub next_page_token: Option<SyncCursor>,
}

/// Opaque continuation token for paging through mailbox history.
///
/// The engines thread this value between the gateway and the caller without
/// inspecting or constructing its contents; the caller owns persistence
/// across sync invocations. An absent cursor means "most recent page".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action suggested by the classifier for a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Archive,
    Delete,
    Keep,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::Archive => "archive",
            SuggestedAction::Delete => "delete",
            SuggestedAction::Keep => "keep",
        }
    }
}

impl FromStr for SuggestedAction {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("archive") {
            Ok(SuggestedAction::Archive)
        } else if s.eq_ignore_ascii_case("delete") {
            Ok(SuggestedAction::Delete)
        } else if s.eq_ignore_ascii_case("keep") {
            Ok(SuggestedAction::Keep)
        } else {
            Err(TriageError::InvalidAction(s.to_string()))
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bulk action applied to the remote mailbox.
///
/// "keep" is a classification outcome, not a mailbox mutation, so it is not
/// part of this vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Archive,
    Delete,
}

impl BatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::Archive => "archive",
            BatchAction::Delete => "delete",
        }
    }
}

impl FromStr for BatchAction {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("archive") {
            Ok(BatchAction::Archive)
        } else if s.eq_ignore_ascii_case("delete") {
            Ok(BatchAction::Delete)
        } else {
            Err(TriageError::InvalidAction(s.to_string()))
        }
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one sync invocation
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Messages newly stored this call (existing ids are skipped)
    pub synced_count: usize,
    /// Resume point for the next call; absent at the end of history
    pub next_cursor: Option<SyncCursor>,
}

/// Outcome of one classification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyReport {
    pub processed_count: usize,
    pub error: Option<String>,
}

/// Outcome of a bulk archive/delete action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchActionReport {
    pub success: bool,
    /// Number of messages the remote mutation covered
    pub count: usize,
}
