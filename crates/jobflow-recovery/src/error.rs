//! The recoverable error type and its per-category retry policies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::{BackoffPolicy, BackoffStep};
use crate::capture::{ACTIVITY_KEY, CHECK_SYSTEMS_ACTIVITY};

/// Category of a transient failure.
///
/// The order of [`RecoveryCategory::PRIORITY`] is the order the classifier
/// tests categories in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryCategory {
    ServiceConnection,
    SystemUnavailable,
    AppUnavailable,
    Quota,
    SshConnection,
    SshTimeout,
    SshAuthentication,
}

impl RecoveryCategory {
    /// Classifier test order; the first matching category wins
    pub const PRIORITY: [RecoveryCategory; 7] = [
        RecoveryCategory::ServiceConnection,
        RecoveryCategory::SystemUnavailable,
        RecoveryCategory::AppUnavailable,
        RecoveryCategory::Quota,
        RecoveryCategory::SshConnection,
        RecoveryCategory::SshTimeout,
        RecoveryCategory::SshAuthentication,
    ];

    /// Stable upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryCategory::ServiceConnection => "SERVICE_CONNECTION",
            RecoveryCategory::SystemUnavailable => "SYSTEM_UNAVAILABLE",
            RecoveryCategory::AppUnavailable => "APP_UNAVAILABLE",
            RecoveryCategory::Quota => "QUOTA",
            RecoveryCategory::SshConnection => "SSH_CONNECTION",
            RecoveryCategory::SshTimeout => "SSH_TIMEOUT",
            RecoveryCategory::SshAuthentication => "SSH_AUTHENTICATION",
        }
    }
}

impl fmt::Display for RecoveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Self::PRIORITY
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(&wanted))
            .copied()
            .ok_or_else(|| format!("unknown recovery category: {}", s))
    }
}

/// A failure believed to be transient.
///
/// `state` holds the tester parameters that define which failures are
/// equivalent, plus the job activity stamped by [`update_job_activity`].
///
/// [`update_job_activity`]: RecoverableError::update_job_activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{category}: {message}")]
pub struct RecoverableError {
    pub category: RecoveryCategory,
    pub message: String,
    pub state: BTreeMap<String, String>,
}

impl RecoverableError {
    pub fn new(
        category: RecoveryCategory,
        message: impl Into<String>,
        state: BTreeMap<String, String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            state,
        }
    }

    /// Record the activity in progress when the failure occurred.
    ///
    /// Only the first call has an effect.
    pub fn update_job_activity(&mut self, activity: &str) {
        self.state
            .entry(ACTIVITY_KEY.to_string())
            .or_insert_with(|| activity.to_string());
    }

    /// Activity stamped by [`update_job_activity`](Self::update_job_activity)
    pub fn job_activity(&self) -> Option<&str> {
        self.state.get(ACTIVITY_KEY).map(String::as_str)
    }

    /// Tester parameters without the activity stamp
    pub fn tester_params(&self) -> BTreeMap<String, String> {
        self.state
            .iter()
            .filter(|(k, _)| k.as_str() != ACTIVITY_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Retry policy for this failure.
    ///
    /// SSH authentication failures seen while first checking systems get few
    /// retries; later ones are more likely a passing auth-service problem.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let first_auth_attempt = self.job_activity() == Some(CHECK_SYSTEMS_ACTIVITY);
        category_policy(self.category, first_auth_attempt)
    }
}

fn hours(h: u64) -> Option<Duration> {
    Some(Duration::from_secs(h * 3600))
}

/// Policy table per category
fn category_policy(category: RecoveryCategory, first_auth_attempt: bool) -> BackoffPolicy {
    let (steps, ceiling) = match category {
        RecoveryCategory::ServiceConnection => (
            vec![BackoffStep::minutes(5, 1), BackoffStep::minutes(30, 2)],
            None,
        ),
        RecoveryCategory::SystemUnavailable | RecoveryCategory::AppUnavailable => (
            vec![
                BackoffStep::minutes(3, 1),
                BackoffStep::minutes(6, 5),
                BackoffStep::minutes(16, 15),
            ],
            hours(6),
        ),
        RecoveryCategory::Quota => (
            vec![
                BackoffStep::minutes(6, 5),
                BackoffStep::minutes(12, 15),
                BackoffStep::minutes(22, 30),
            ],
            hours(16),
        ),
        RecoveryCategory::SshConnection => (
            vec![
                BackoffStep::minutes(5, 1),
                BackoffStep::minutes(5, 2),
                BackoffStep::minutes(3, 5),
            ],
            hours(3),
        ),
        RecoveryCategory::SshTimeout => (
            vec![BackoffStep::minutes(5, 1), BackoffStep::minutes(10, 2)],
            hours(1),
        ),
        RecoveryCategory::SshAuthentication if first_auth_attempt => (
            vec![BackoffStep::minutes(2, 1)],
            Some(Duration::from_secs(15 * 60)),
        ),
        RecoveryCategory::SshAuthentication => (
            vec![
                BackoffStep::minutes(5, 1),
                BackoffStep::minutes(5, 5),
                BackoffStep::minutes(4, 15),
            ],
            hours(2),
        ),
    };

    BackoffPolicy::from_table(steps, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh_auth() -> RecoverableError {
        RecoverableError::new(
            RecoveryCategory::SshAuthentication,
            "permission denied",
            BTreeMap::from([("host".to_string(), "login.example.org".to_string())]),
        )
    }

    #[test]
    fn test_activity_first_value_wins() {
        let mut err = ssh_auth();
        err.update_job_activity("CHECK_SYSTEMS");
        err.update_job_activity("SUBMIT_JOB");
        assert_eq!(err.job_activity(), Some("CHECK_SYSTEMS"));
    }

    #[test]
    fn test_ssh_auth_first_attempt_policy() {
        let mut err = ssh_auth();
        err.update_job_activity(CHECK_SYSTEMS_ACTIVITY);
        let policy = err.backoff_policy();
        assert_eq!(policy.total_tries(), Some(2));
    }

    #[test]
    fn test_ssh_auth_later_attempt_policy() {
        let mut later = ssh_auth();
        later.update_job_activity("SUBMIT_JOB");
        assert_eq!(later.backoff_policy().total_tries(), Some(14));

        // No activity recorded at all
        assert_eq!(ssh_auth().backoff_policy().total_tries(), Some(14));
    }

    #[test]
    fn test_ssh_connection_policy() {
        let err = RecoverableError::new(RecoveryCategory::SshConnection, "refused", BTreeMap::new());
        let policy = err.backoff_policy();
        assert_eq!(
            policy.steps(),
            &[
                BackoffStep::minutes(5, 1),
                BackoffStep::minutes(5, 2),
                BackoffStep::minutes(3, 5)
            ]
        );
        assert_eq!(policy.max_failure(), Some(Duration::from_secs(3 * 3600)));
    }

    #[test]
    fn test_service_connection_policy_has_no_ceiling() {
        let err =
            RecoverableError::new(RecoveryCategory::ServiceConnection, "down", BTreeMap::new());
        let policy = err.backoff_policy();
        assert_eq!(policy.steps().len(), 2);
        assert_eq!(policy.max_failure(), None);
    }

    #[test]
    fn test_tester_params_exclude_activity() {
        let mut err = ssh_auth();
        err.update_job_activity("STAGE_JOB");
        let params = err.tester_params();
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("host"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("ssh-timeout".parse::<RecoveryCategory>(), Ok(RecoveryCategory::SshTimeout));
        assert_eq!("QUOTA".parse::<RecoveryCategory>(), Ok(RecoveryCategory::Quota));
        assert!("disk".parse::<RecoveryCategory>().is_err());
    }
}
