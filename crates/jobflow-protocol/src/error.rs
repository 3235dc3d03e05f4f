//! Parse errors for string-encoded protocol values.

/// Error returned when a protocol string does not name a known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown job status: {0}")]
    JobStatus(String),

    #[error("unknown job type: {0}")]
    JobType(String),

    #[error("unknown runtime: {0}")]
    Runtime(String),

    #[error("unknown scheduler: {0}")]
    Scheduler(String),

    #[error("unknown async command: {0}")]
    Command(String),
}
