//! Stepwise backoff policy engine.
//!
//! A policy is an ordered list of `(max_tries, delay)` steps. Each call to
//! [`BackoffState::next_delay`] consumes one try from the current step and
//! moves to the next step once the current one is used up. A final step with
//! `max_tries <= 0` never runs out.
//!
//! Independently of the step budget, a failure series that has lasted longer
//! than the policy's ceiling ends the session with
//! [`Exhausted::TooManyFailures`]. Any success clears the series.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default ceiling for a failure series during polling (5 minutes)
pub const DEFAULT_MAX_FAILURE_MS: u64 = 5 * 60 * 1000;

/// One step of a backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffStep {
    /// Tries at this delay; `<= 0` means unlimited (final step only)
    pub max_tries: i32,
    /// Delay before each try, in milliseconds
    pub delay_ms: u64,
}

impl BackoffStep {
    pub const fn new(max_tries: i32, delay_ms: u64) -> Self {
        Self { max_tries, delay_ms }
    }

    /// Step with a delay given in whole minutes
    pub const fn minutes(max_tries: i32, minutes: u64) -> Self {
        Self::new(max_tries, minutes * 60 * 1000)
    }

    /// Step with a delay given in whole seconds
    pub const fn seconds(max_tries: i32, seconds: u64) -> Self {
        Self::new(max_tries, seconds * 1000)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_tries <= 0
    }
}

/// Ordered step list plus the failure-series ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    steps: Vec<BackoffStep>,
    /// Longest a failure series may last; `None` disables the guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_failure_ms: Option<u64>,
}

/// Policy construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("backoff policy needs at least one step")]
    NoSteps,

    #[error("step {index} has unlimited tries but is not the final step")]
    UnlimitedStepNotLast { index: usize },
}

/// Why a backoff session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exhausted {
    #[error("too many attempts")]
    TooManyAttempts,

    #[error("too many failures")]
    TooManyFailures,
}

impl BackoffPolicy {
    /// Build a policy, rejecting empty step lists and unlimited steps that
    /// would make later steps unreachable.
    pub fn new(steps: Vec<BackoffStep>, max_failure: Option<Duration>) -> Result<Self, PolicyError> {
        if steps.is_empty() {
            return Err(PolicyError::NoSteps);
        }
        let last = steps.len() - 1;
        if let Some(index) = steps[..last].iter().position(BackoffStep::is_unlimited) {
            return Err(PolicyError::UnlimitedStepNotLast { index });
        }

        Ok(Self {
            steps,
            max_failure_ms: max_failure.map(|d| d.as_millis() as u64),
        })
    }

    /// Policy from a built-in table whose shape is known to be valid
    pub(crate) fn from_table(steps: Vec<BackoffStep>, max_failure: Option<Duration>) -> Self {
        debug_assert!(Self::new(steps.clone(), max_failure).is_ok());
        Self {
            steps,
            max_failure_ms: max_failure.map(|d| d.as_millis() as u64),
        }
    }

    /// Policy with the default 5-minute failure ceiling
    pub fn with_default_ceiling(steps: Vec<BackoffStep>) -> Result<Self, PolicyError> {
        Self::new(steps, Some(Duration::from_millis(DEFAULT_MAX_FAILURE_MS)))
    }

    pub fn steps(&self) -> &[BackoffStep] {
        &self.steps
    }

    pub fn max_failure(&self) -> Option<Duration> {
        self.max_failure_ms.map(Duration::from_millis)
    }

    /// Total tries before step exhaustion, `None` if the last step is unlimited
    pub fn total_tries(&self) -> Option<u64> {
        self.steps
            .iter()
            .try_fold(0u64, |acc, step| {
                (!step.is_unlimited()).then(|| acc + step.max_tries as u64)
            })
    }

    /// Start a fresh polling session
    pub fn start(&self) -> BackoffState {
        BackoffState::new(self.clone())
    }
}

/// Mutable cursor over a policy, scoped to one polling session
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    step: usize,
    tries: i32,
    first_failure: Option<Instant>,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            step: 0,
            tries: 0,
            first_failure: None,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Index of the step the next delay will come from
    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Tries consumed from the current step
    pub fn tries_in_step(&self) -> i32 {
        self.tries
    }

    /// Compute the next delay using the current time
    pub fn next_delay(&mut self) -> Result<Duration, Exhausted> {
        self.next_delay_at(Instant::now())
    }

    /// Compute the next delay as of `now`.
    ///
    /// The failure-series guard is checked before the step budget.
    pub fn next_delay_at(&mut self, now: Instant) -> Result<Duration, Exhausted> {
        if self.too_many_failures_at(now) {
            return Err(Exhausted::TooManyFailures);
        }

        loop {
            let step = self
                .policy
                .steps
                .get(self.step)
                .ok_or(Exhausted::TooManyAttempts)?;

            if step.is_unlimited() {
                return Ok(step.delay());
            }
            if self.tries < step.max_tries {
                self.tries += 1;
                return Ok(step.delay());
            }

            self.step += 1;
            self.tries = 0;
        }
    }

    /// Note a failed attempt; starts the failure series if none is active
    pub fn record_failure_at(&mut self, now: Instant) {
        self.first_failure.get_or_insert(now);
    }

    /// Note a successful attempt; ends the failure series
    pub fn record_success(&mut self) {
        self.first_failure = None;
    }

    /// Start of the current failure series
    pub fn first_failure(&self) -> Option<Instant> {
        self.first_failure
    }

    /// Exhausted once the failure series has lasted longer than the ceiling
    pub fn too_many_failures_at(&self, now: Instant) -> bool {
        match (self.first_failure, self.policy.max_failure()) {
            (Some(first), Some(ceiling)) => now.saturating_duration_since(first) > ceiling,
            _ => false,
        }
    }
}
