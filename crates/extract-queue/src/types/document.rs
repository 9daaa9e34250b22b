//! Document identity and durable status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Identifies a document for the checkpoint and status collaborators
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Owning project
    pub project_id: String,
    /// Document identifier, unique within the live queue
    pub document_id: String,
}

impl DocumentKey {
    /// Create a key from its parts
    pub fn new(project_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            document_id: document_id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.document_id)
    }
}

/// Status of a document, shared by live tasks and the durable status record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Known but not admitted (e.g. reset by startup recovery)
    Pending,
    /// Waiting in the FIFO
    Queued,
    /// Held by the worker
    Processing,
    /// Stopped at a page boundary on request, resumable
    Paused,
    /// Stopped with some pages completed
    Partial,
    /// All pages extracted
    Completed,
    /// Stopped with no page completed
    Failed,
    /// Cancelled before any page completed
    Cancelled,
}

impl DocumentStatus {
    /// Canonical storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Partial => "partial",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Queued, processing or paused: the task still owns its payload
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Queued | Self::Processing | Self::Paused)
    }

    /// A run has ended; only an explicit retry leaves this state
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Partial | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    /// States a document can be retried from
    pub const fn is_retryable(self) -> bool {
        self.is_terminal() || matches!(self, Self::Pending)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DocumentStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "paused" => Ok(Self::Paused),
            "partial" => Ok(Self::Partial),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(Error::corrupt_record("status", format!("unknown status '{}'", value))),
        }
    }
}

/// One row of the durable status record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub key: DocumentKey,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Queued,
            DocumentStatus::Processing,
            DocumentStatus::Paused,
            DocumentStatus::Partial,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
            DocumentStatus::Cancelled,
        ] {
            assert_eq!(DocumentStatus::try_from(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(DocumentStatus::try_from("exploded").is_err());
        assert_eq!(
            DocumentStatus::try_from(" Completed ").unwrap(),
            DocumentStatus::Completed
        );
    }

    #[test]
    fn test_status_classes() {
        assert!(DocumentStatus::Paused.is_live());
        assert!(!DocumentStatus::Paused.is_terminal());
        assert!(DocumentStatus::Partial.is_terminal());
        assert!(DocumentStatus::Pending.is_retryable());
        assert!(!DocumentStatus::Processing.is_retryable());
    }
}
