//! Tester-parameter capture.
//!
//! Each function serializes only the attributes that make two failures "the
//! same problem". Job uuids, timestamps and observed counters are left out so
//! that every job blocked on one root cause maps to one recovery record.

use std::collections::BTreeMap;

/// State key holding the activity stamped onto a recoverable error
pub const ACTIVITY_KEY: &str = "job_activity";

/// Activity name used while resolving and checking systems
pub const CHECK_SYSTEMS_ACTIVITY: &str = "CHECK_SYSTEMS";

/// Keys used by the capture functions
pub mod keys {
    pub const TENANT: &str = "tenant";
    pub const SERVICE: &str = "service";
    pub const SYSTEM_ID: &str = "system_id";
    pub const OWNER: &str = "owner";
    pub const APP_ID: &str = "app_id";
    pub const APP_VERSION: &str = "app_version";
    pub const QUEUE: &str = "queue";
    pub const MAX_JOBS: &str = "max_jobs";
    pub const MAX_JOBS_PER_USER: &str = "max_jobs_per_user";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const USER: &str = "user";
}

fn state<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Service outage: one record per tenant and service
pub fn capture_service_state(tenant: &str, service: &str) -> BTreeMap<String, String> {
    state([
        (keys::TENANT, tenant.to_string()),
        (keys::SERVICE, service.to_string()),
    ])
}

/// System availability: system id, tenant and owner
pub fn capture_system_state(tenant: &str, system_id: &str, owner: &str) -> BTreeMap<String, String> {
    state([
        (keys::TENANT, tenant.to_string()),
        (keys::SYSTEM_ID, system_id.to_string()),
        (keys::OWNER, owner.to_string()),
    ])
}

/// App availability: app id and version, tenant and owner
pub fn capture_app_state(
    tenant: &str,
    app_id: &str,
    app_version: &str,
    owner: &str,
) -> BTreeMap<String, String> {
    state([
        (keys::TENANT, tenant.to_string()),
        (keys::APP_ID, app_id.to_string()),
        (keys::APP_VERSION, app_version.to_string()),
        (keys::OWNER, owner.to_string()),
    ])
}

/// Quota: tenant, system, owner, logical queue and the thresholds in force
pub fn capture_quota_state(
    tenant: &str,
    system_id: &str,
    owner: &str,
    queue: &str,
    max_jobs: u32,
    max_jobs_per_user: u32,
) -> BTreeMap<String, String> {
    state([
        (keys::TENANT, tenant.to_string()),
        (keys::SYSTEM_ID, system_id.to_string()),
        (keys::OWNER, owner.to_string()),
        (keys::QUEUE, queue.to_string()),
        (keys::MAX_JOBS, max_jobs.to_string()),
        (keys::MAX_JOBS_PER_USER, max_jobs_per_user.to_string()),
    ])
}

/// SSH connection, timeout and authentication: the endpoint and login user
pub fn capture_ssh_state(
    tenant: &str,
    system_id: &str,
    host: &str,
    port: u16,
    user: &str,
) -> BTreeMap<String, String> {
    state([
        (keys::TENANT, tenant.to_string()),
        (keys::SYSTEM_ID, system_id.to_string()),
        (keys::HOST, host.to_string()),
        (keys::PORT, port.to_string()),
        (keys::USER, user.to_string()),
    ])
}
