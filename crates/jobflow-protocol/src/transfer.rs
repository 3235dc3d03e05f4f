//! Transfer service request and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a transfer task as reported by the transfer service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Accepted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// Any in-progress state this crate does not name
    #[serde(untagged)]
    Other(String),
}

impl TransferStatus {
    /// COMPLETED, FAILED and CANCELLED end a transfer
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransferStatus::Accepted => "ACCEPTED",
            TransferStatus::InProgress => "IN_PROGRESS",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Other(s) => s,
        }
    }
}

/// A transfer task as returned by `get_transfer_task`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    /// Transfer service identifier
    pub id: String,
    /// Current status
    pub status: TransferStatus,
    /// Error text reported by the service for failed transfers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last time the service updated the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// One source → destination pair in a transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferElement {
    pub source_uri: String,
    pub dest_uri: String,
}

/// Request to create a transfer task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Tag used by the service to correlate tasks with the job
    pub tag: String,
    pub elements: Vec<TransferElement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_is_preserved() {
        let status: TransferStatus = serde_json::from_str("\"STAGING\"").unwrap();
        assert_eq!(status, TransferStatus::Other("STAGING".to_string()));
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_known_status() {
        let task: TransferTask =
            serde_json::from_str(r#"{"id":"t-1","status":"FAILED","error_message":"disk full"}"#)
                .unwrap();
        assert_eq!(task.status, TransferStatus::Failed);
        assert!(task.status.is_terminal());
        assert_eq!(task.error_message.as_deref(), Some("disk full"));
    }
}
