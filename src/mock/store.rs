//! In-memory job store

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use jobflow_protocol::{ConditionCode, JobStatus};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use crate::job::Job;
use crate::ports::{JobStore, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<Uuid, Job>,
    /// Every status each job was saved in, in order
    history: HashMap<Uuid, Vec<JobStatus>>,
    failures: FailureInjector,
}

/// Job store backed by a map, recording status history for assertions
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Seed a job without going through failure injection
    pub fn insert(&self, job: Job) {
        let mut state = self.lock();
        state.history.entry(job.uuid).or_default().push(job.status);
        state.jobs.insert(job.uuid, job);
    }

    pub fn get(&self, uuid: Uuid) -> Option<Job> {
        self.lock().jobs.get(&uuid).cloned()
    }

    /// Distinct consecutive statuses the job was saved in
    pub fn status_history(&self, uuid: Uuid) -> Vec<JobStatus> {
        self.lock().history.get(&uuid).cloned().unwrap_or_default()
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }
}

impl JobStore for InMemoryJobStore {
    fn load(&self, uuid: Uuid) -> Result<Job, StoreError> {
        self.lock()
            .jobs
            .get(&uuid)
            .cloned()
            .ok_or(StoreError::NotFound(uuid))
    }

    fn save(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.check(MockOp::StoreSave) {
            return Err(failure.store_error());
        }

        let history = state.history.entry(job.uuid).or_default();
        if history.last() != Some(&job.status) {
            history.push(job.status);
        }
        state.jobs.insert(job.uuid, job.clone());
        Ok(())
    }

    fn set_remote_job_id(&self, uuid: Uuid, remote_job_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
        job.remote_job_id = Some(remote_job_id.to_string());
        Ok(())
    }

    fn set_condition(
        &self,
        uuid: Uuid,
        code: ConditionCode,
        last_message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
        job.condition = Some(code);
        job.last_message = Some(last_message.to_string());
        Ok(())
    }

    fn count_active_jobs(
        &self,
        tenant: &str,
        system_id: &str,
        queue: &str,
        owner: Option<&str>,
    ) -> Result<u32, StoreError> {
        let state = self.lock();
        let count = state
            .jobs
            .values()
            .filter(|j| j.tenant == tenant && j.exec_system_id == system_id)
            .filter(|j| j.exec_system_logical_queue.as_deref() == Some(queue))
            .filter(|j| owner.map_or(true, |o| j.owner == o))
            .filter(|j| j.status.is_remote())
            .count();
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn queued_job(owner: &str) -> Job {
        let mut job = Job::new("dev", owner, "sim", "1.0", "frontera", Utc::now());
        job.exec_system_logical_queue = Some("normal".to_string());
        job.status = JobStatus::Queued;
        job
    }

    #[test]
    fn test_history_skips_repeats() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        store.insert(job.clone());
        store.save(&job).unwrap();
        job.transition(JobStatus::ProcessingInputs, Utc::now()).unwrap();
        store.save(&job).unwrap();

        assert_eq!(
            store.status_history(job.uuid),
            vec![JobStatus::Pending, JobStatus::ProcessingInputs]
        );
    }

    #[test]
    fn test_count_active_jobs() {
        let store = InMemoryJobStore::new();
        store.insert(queued_job("alice"));
        store.insert(queued_job("alice"));
        store.insert(queued_job("bob"));
        let mut done = queued_job("alice");
        done.status = JobStatus::Finished;
        store.insert(done);

        assert_eq!(store.count_active_jobs("dev", "frontera", "normal", None).unwrap(), 3);
        assert_eq!(
            store
                .count_active_jobs("dev", "frontera", "normal", Some("alice"))
                .unwrap(),
            2
        );
        assert_eq!(store.count_active_jobs("dev", "frontera", "gpu", None).unwrap(), 0);
    }

    #[test]
    fn test_injected_save_failure() {
        let store = InMemoryJobStore::new();
        store.inject(
            MockOp::StoreSave,
            FailureConfig::service("db").with_fail_count(1),
        );
        let job = Job::new("dev", "alice", "sim", "1.0", "frontera", Utc::now());
        assert!(store.save(&job).is_err());
        assert!(store.save(&job).is_ok());
    }
}
