//! Lifecycle events emitted to the notification sink.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEventKind {
    /// Input staging transfer reached a terminal state
    StagingInputs,
    /// Output archiving transfer reached a terminal state
    Archiving,
    /// Job status changed
    StatusChange,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::StagingInputs => "STAGING_INPUTS",
            JobEventKind::Archiving => "ARCHIVING",
            JobEventKind::StatusChange => "STATUS_CHANGE",
        }
    }
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
