//! Recovery records: many blocked jobs, one root cause.
//!
//! Messages from the recovery queue are merged by fingerprint. Each record
//! keeps its own backoff session; the policy and ceiling come from the first
//! message that created it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobflow_protocol::JobStatus;

use crate::backoff::{BackoffState, Exhausted};
use crate::error::RecoveryCategory;
use crate::record::RecoveryMessage;

/// A root cause and the jobs parked on it
#[derive(Debug, Clone)]
pub struct RecoveryRecord {
    pub id: Uuid,
    pub fingerprint: String,
    pub category: RecoveryCategory,
    pub tenant: String,
    pub tester_params: BTreeMap<String, String>,
    /// Blocked jobs and the stage each one resumes in
    pub blocked_jobs: BTreeMap<Uuid, JobStatus>,
    pub created: DateTime<Utc>,
    /// Tester runs so far
    pub attempts: u32,
    pub next_attempt: Instant,
    backoff: BackoffState,
}

impl RecoveryRecord {
    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }
}

/// Serializable view of a record, for logs and the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: Uuid,
    pub fingerprint: String,
    pub category: RecoveryCategory,
    pub tenant: String,
    pub tester_params: BTreeMap<String, String>,
    pub blocked_jobs: usize,
    pub attempts: u32,
}

impl From<&RecoveryRecord> for RecordSummary {
    fn from(r: &RecoveryRecord) -> Self {
        Self {
            id: r.id,
            fingerprint: r.fingerprint.clone(),
            category: r.category,
            tenant: r.tenant.clone(),
            tester_params: r.tester_params.clone(),
            blocked_jobs: r.blocked_jobs.len(),
            attempts: r.attempts,
        }
    }
}

/// Result of adding a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new record was created
    Created { record_id: Uuid },
    /// The job joined an existing record
    Joined { record_id: Uuid },
}

impl AddOutcome {
    pub fn record_id(&self) -> Uuid {
        match self {
            AddOutcome::Created { record_id } | AddOutcome::Joined { record_id } => *record_id,
        }
    }
}

/// Result of a failed tester run
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Tried again at the given instant
    Rescheduled(Instant),
    /// The record ran out of budget and was removed
    Expired {
        record: RecoveryRecord,
        reason: Exhausted,
    },
}

/// Work handed to a tester
#[derive(Debug, Clone, PartialEq)]
pub struct DueRecord {
    pub fingerprint: String,
    pub category: RecoveryCategory,
    pub tenant: String,
    pub tester_params: BTreeMap<String, String>,
}

/// Thread-safe store of recovery records keyed by fingerprint
#[derive(Debug, Default)]
pub struct RecoveryManager {
    records: Mutex<HashMap<String, RecoveryRecord>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RecoveryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge a recovery message into the record for its fingerprint
    pub fn add(&self, msg: RecoveryMessage, now: Instant) -> AddOutcome {
        let mut records = self.lock();

        if let Some(record) = records.get_mut(&msg.fingerprint) {
            record.blocked_jobs.insert(msg.job_uuid, msg.blocked_from);
            debug!(
                record_id = %record.id,
                job_uuid = %msg.job_uuid,
                blocked = record.blocked_jobs.len(),
                "job joined recovery record"
            );
            return AddOutcome::Joined {
                record_id: record.id,
            };
        }

        let mut backoff = msg.policy.start();
        backoff.record_failure_at(now);
        let delay = backoff.next_delay_at(now).unwrap_or(Duration::ZERO);

        let record = RecoveryRecord {
            id: Uuid::new_v4(),
            fingerprint: msg.fingerprint.clone(),
            category: msg.category,
            tenant: msg.tenant,
            tester_params: msg.tester_params,
            blocked_jobs: BTreeMap::from([(msg.job_uuid, msg.blocked_from)]),
            created: msg.created,
            attempts: 0,
            next_attempt: now + delay,
            backoff,
        };
        let record_id = record.id;

        info!(
            %record_id,
            category = %record.category,
            fingerprint = %record.fingerprint,
            first_attempt_in_ms = delay.as_millis() as u64,
            "recovery record created"
        );
        records.insert(msg.fingerprint, record);

        AddOutcome::Created { record_id }
    }

    /// Records whose next attempt is at or before `now`
    pub fn due(&self, now: Instant) -> Vec<DueRecord> {
        let records = self.lock();
        let mut due: Vec<_> = records
            .values()
            .filter(|r| r.next_attempt <= now)
            .map(|r| DueRecord {
                fingerprint: r.fingerprint.clone(),
                category: r.category,
                tenant: r.tenant.clone(),
                tester_params: r.tester_params.clone(),
            })
            .collect();
        due.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        due
    }

    /// The condition cleared: remove and return the record
    pub fn attempt_succeeded(&self, fingerprint: &str) -> Option<RecoveryRecord> {
        let mut record = self.lock().remove(fingerprint)?;
        record.attempts += 1;
        record.backoff.record_success();
        info!(
            record_id = %record.id,
            category = %record.category,
            jobs = record.blocked_jobs.len(),
            "recovery condition cleared"
        );
        Some(record)
    }

    /// The condition persists: schedule the next attempt or expire the record
    pub fn attempt_failed(&self, fingerprint: &str, now: Instant) -> Option<AttemptOutcome> {
        let mut records = self.lock();
        let record = records.get_mut(fingerprint)?;
        record.attempts += 1;
        record.backoff.record_failure_at(now);

        match record.backoff.next_delay_at(now) {
            Ok(delay) => {
                record.next_attempt = now + delay;
                debug!(
                    record_id = %record.id,
                    attempts = record.attempts,
                    next_in_ms = delay.as_millis() as u64,
                    "recovery attempt failed, rescheduled"
                );
                Some(AttemptOutcome::Rescheduled(record.next_attempt))
            }
            Err(reason) => {
                let record = records.remove(fingerprint)?;
                warn!(
                    record_id = %record.id,
                    category = %record.category,
                    attempts = record.attempts,
                    %reason,
                    "recovery record expired"
                );
                Some(AttemptOutcome::Expired { record, reason })
            }
        }
    }

    /// Drop a job from whatever record holds it, e.g. after a cancel.
    ///
    /// Records left without jobs are removed.
    pub fn remove_job(&self, job_uuid: Uuid) -> bool {
        let mut records = self.lock();
        let mut found = false;
        records.retain(|_, r| {
            if r.blocked_jobs.remove(&job_uuid).is_some() {
                found = true;
            }
            !r.blocked_jobs.is_empty()
        });
        found
    }

    pub fn get(&self, fingerprint: &str) -> Option<RecordSummary> {
        self.lock().get(fingerprint).map(RecordSummary::from)
    }

    pub fn summaries(&self) -> Vec<RecordSummary> {
        let mut out: Vec<_> = self.lock().values().map(RecordSummary::from).collect();
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_ssh_state;
    use crate::error::RecoverableError;

    fn message(job: Uuid, blocked_from: JobStatus) -> RecoveryMessage {
        let mut err = RecoverableError::new(
            RecoveryCategory::SshConnection,
            "connection refused",
            capture_ssh_state("dev", "frontera", "login.example.org", 22, "alice"),
        );
        err.update_job_activity("SUBMIT_JOB");
        RecoveryMessage::from_error(job, "dev", blocked_from, &err, Utc::now()).unwrap()
    }

    #[test]
    fn test_messages_with_same_fingerprint_merge() {
        let mgr = RecoveryManager::new();
        let now = Instant::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = mgr.add(message(a, JobStatus::SubmittingJob), now);
        let second = mgr.add(message(b, JobStatus::StagingJob), now);
        assert!(matches!(first, AddOutcome::Created { .. }));
        assert_eq!(second, AddOutcome::Joined { record_id: first.record_id() });
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.summaries()[0].blocked_jobs, 2);
    }

    #[test]
    fn test_first_attempt_uses_first_step_delay() {
        let mgr = RecoveryManager::new();
        let now = Instant::now();
        mgr.add(message(Uuid::new_v4(), JobStatus::SubmittingJob), now);

        assert!(mgr.due(now).is_empty());
        assert!(mgr.due(now + Duration::from_secs(59)).is_empty());
        assert_eq!(mgr.due(now + Duration::from_secs(60)).len(), 1);
    }

    #[test]
    fn test_success_removes_record() {
        let mgr = RecoveryManager::new();
        let now = Instant::now();
        let job = Uuid::new_v4();
        let msg = message(job, JobStatus::SubmittingJob);
        let fp = msg.fingerprint.clone();
        mgr.add(msg, now);

        let record = mgr.attempt_succeeded(&fp).unwrap();
        assert_eq!(record.blocked_jobs.get(&job), Some(&JobStatus::SubmittingJob));
        assert!(mgr.is_empty());
        assert!(mgr.attempt_succeeded(&fp).is_none());
    }

    #[test]
    fn test_ceiling_expires_record() {
        let mgr = RecoveryManager::new();
        let start = Instant::now();
        let msg = message(Uuid::new_v4(), JobStatus::SubmittingJob);
        let fp = msg.fingerprint.clone();
        mgr.add(msg, start);

        let at = start + Duration::from_secs(60);
        assert!(matches!(
            mgr.attempt_failed(&fp, at),
            Some(AttemptOutcome::Rescheduled(next)) if next == at + Duration::from_secs(60)
        ));

        // Past the 3 hour ceiling
        let late = start + Duration::from_secs(3 * 3600 + 1);
        match mgr.attempt_failed(&fp, late) {
            Some(AttemptOutcome::Expired { reason, .. }) => {
                assert_eq!(reason, Exhausted::TooManyFailures)
            }
            other => panic!("expected expiry, got {:?}", other),
        }
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_step_budget_expires_record() {
        let mgr = RecoveryManager::new();
        let start = Instant::now();
        let msg = message(Uuid::new_v4(), JobStatus::SubmittingJob);
        let fp = msg.fingerprint.clone();
        mgr.add(msg, start);

        // 13 tries in total; creation consumed one
        for _ in 0..12 {
            assert!(matches!(
                mgr.attempt_failed(&fp, start),
                Some(AttemptOutcome::Rescheduled(_))
            ));
        }
        assert!(matches!(
            mgr.attempt_failed(&fp, start),
            Some(AttemptOutcome::Expired {
                reason: Exhausted::TooManyAttempts,
                ..
            })
        ));
    }

    #[test]
    fn test_later_auth_failure_keeps_its_own_schedule() {
        let mgr = RecoveryManager::new();
        let start = Instant::now();
        let auth_message = |activity: &str| {
            let mut err = RecoverableError::new(
                RecoveryCategory::SshAuthentication,
                "permission denied",
                capture_ssh_state("dev", "frontera", "login.example.org", 22, "alice"),
            );
            err.update_job_activity(activity);
            RecoveryMessage::from_error(Uuid::new_v4(), "dev", JobStatus::SubmittingJob, &err, Utc::now())
                .unwrap()
        };

        let first = auth_message("CHECK_SYSTEMS");
        let later = auth_message("SUBMIT_JOB");
        let (first_fp, later_fp) = (first.fingerprint.clone(), later.fingerprint.clone());
        assert!(matches!(mgr.add(first, start), AddOutcome::Created { .. }));
        assert!(matches!(mgr.add(later, start), AddOutcome::Created { .. }));
        assert_eq!(mgr.len(), 2);

        // Two tries for the first-attempt record
        let at = start + Duration::from_secs(60);
        assert!(matches!(
            mgr.attempt_failed(&first_fp, at),
            Some(AttemptOutcome::Rescheduled(_))
        ));
        assert!(matches!(
            mgr.attempt_failed(&first_fp, at),
            Some(AttemptOutcome::Expired { reason: Exhausted::TooManyAttempts, .. })
        ));

        // 14 tries in total; creation consumed one
        for _ in 0..13 {
            assert!(matches!(
                mgr.attempt_failed(&later_fp, at),
                Some(AttemptOutcome::Rescheduled(_))
            ));
        }
        assert!(mgr.get(&later_fp).is_some());
        assert!(matches!(
            mgr.attempt_failed(&later_fp, at),
            Some(AttemptOutcome::Expired { reason: Exhausted::TooManyAttempts, .. })
        ));
    }

    #[test]
    fn test_remove_job_drops_empty_record() {
        let mgr = RecoveryManager::new();
        let job = Uuid::new_v4();
        mgr.add(message(job, JobStatus::SubmittingJob), Instant::now());
        assert!(mgr.remove_job(job));
        assert!(mgr.is_empty());
        assert!(!mgr.remove_job(job));
    }
}
