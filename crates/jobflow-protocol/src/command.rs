//! Out-of-band operator commands delivered to the worker that owns a job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Async command observed at polling checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsyncCommand {
    /// Stop the job and move it to CANCELLED
    Cancel,
    /// Stop working on the job and release it without changing its status
    Pause,
}

impl AsyncCommand {
    /// Stable upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncCommand::Cancel => "CANCEL",
            AsyncCommand::Pause => "PAUSE",
        }
    }
}

impl fmt::Display for AsyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AsyncCommand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CANCEL" => Ok(AsyncCommand::Cancel),
            "PAUSE" => Ok(AsyncCommand::Pause),
            _ => Err(ParseError::Command(s.to_string())),
        }
    }
}
