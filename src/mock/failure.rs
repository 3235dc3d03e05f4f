//! Failure injection for the in-memory collaborators
//!
//! Each mock checks the injector before doing real work and, when a failure
//! is armed for that operation, raises the corresponding collaborator error.

use std::collections::HashMap;

use jobflow_recovery::{ServiceConnectionError, SshError, SshFailureKind};

use crate::ports::{BusError, ExecError, ResolveError, StoreError, TransferClientError};

/// Collaborator operation a failure can be armed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Connect,
    Execute,
    PutFile,
    TransferClient,
    TransferStatus,
    CreateTransfer,
    CancelTransfer,
    TransferPing,
    Publish,
    ResolveSystem,
    ResolveApp,
    StoreSave,
}

/// What the failing operation raises
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Ssh(SshFailureKind),
    ServiceConnection { service: String },
    Api { status: u16 },
    Io,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    pub failure: InjectedFailure,
    pub message: String,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    pub fn new(failure: InjectedFailure, message: impl Into<String>) -> Self {
        Self {
            failure,
            message: message.into(),
            fail_count: None,
        }
    }

    pub fn ssh(kind: SshFailureKind) -> Self {
        Self::new(InjectedFailure::Ssh(kind), format!("injected ssh {}", kind))
    }

    pub fn service(service: impl Into<String>) -> Self {
        let service = service.into();
        let message = format!("injected {} outage", service);
        Self::new(InjectedFailure::ServiceConnection { service }, message)
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    /// SSH-flavoured error for the executor mocks
    pub fn exec_error(&self, host: &str, port: u16, user: &str) -> ExecError {
        match &self.failure {
            InjectedFailure::Ssh(kind) => {
                SshError::new(*kind, host, port, user, &self.message).into()
            }
            InjectedFailure::ServiceConnection { service } => SshError::new(
                SshFailureKind::Connection,
                host,
                port,
                user,
                &self.message,
            )
            .with_cause(ServiceConnectionError::new(service, &self.message))
            .into(),
            InjectedFailure::Api { .. } | InjectedFailure::Io => {
                ExecError::Io(self.message.clone())
            }
        }
    }

    pub fn transfer_error(&self) -> TransferClientError {
        match &self.failure {
            InjectedFailure::ServiceConnection { service } => {
                ServiceConnectionError::new(service, &self.message).into()
            }
            InjectedFailure::Api { status } => TransferClientError::Api {
                status: *status,
                message: self.message.clone(),
            },
            InjectedFailure::Ssh(_) | InjectedFailure::Io => {
                TransferClientError::Protocol(self.message.clone())
            }
        }
    }

    pub fn bus_error(&self, queue: &'static str) -> BusError {
        match &self.failure {
            InjectedFailure::ServiceConnection { service } => {
                ServiceConnectionError::new(service, &self.message).into()
            }
            _ => BusError::Rejected {
                queue,
                message: self.message.clone(),
            },
        }
    }

    pub fn resolve_error(&self, kind: &'static str, id: &str) -> ResolveError {
        match &self.failure {
            InjectedFailure::ServiceConnection { service } => {
                ServiceConnectionError::new(service, &self.message).into()
            }
            _ => ResolveError::NotFound {
                kind,
                id: id.to_string(),
            },
        }
    }

    pub fn store_error(&self) -> StoreError {
        StoreError::Unavailable(self.message.clone())
    }
}

/// Per-operation failure table
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<MockOp, FailureConfig>,
    /// Call counts per operation (for fail_count tracking)
    call_counts: HashMap<MockOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a failure for an operation
    pub fn inject(&mut self, op: MockOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: MockOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Failure to raise for this call, if any
    pub fn check(&mut self, op: MockOp) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        match config.fail_count {
            Some(limit) if *count > limit => None,
            _ => Some(config.clone()),
        }
    }

    /// Calls seen since the failure was armed
    pub fn calls(&self, op: MockOp) -> u32 {
        self.call_counts.get(&op).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_recovery::{classify_chain, FailureContext, RecoveryCategory};

    #[test]
    fn test_injector_basic() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(MockOp::Execute).is_none());

        injector.inject(MockOp::Execute, FailureConfig::ssh(SshFailureKind::Timeout));
        let config = injector.check(MockOp::Execute).unwrap();
        assert_eq!(config.failure, InjectedFailure::Ssh(SshFailureKind::Timeout));
        assert!(injector.check(MockOp::Connect).is_none());
    }

    #[test]
    fn test_injector_fail_count() {
        let mut injector = FailureInjector::new();
        injector.inject(
            MockOp::TransferStatus,
            FailureConfig::service("files").with_fail_count(2),
        );

        assert!(injector.check(MockOp::TransferStatus).is_some());
        assert!(injector.check(MockOp::TransferStatus).is_some());
        assert!(injector.check(MockOp::TransferStatus).is_none());
        assert_eq!(injector.calls(MockOp::TransferStatus), 3);
    }

    #[test]
    fn test_injector_clear() {
        let mut injector = FailureInjector::new();
        injector.inject(MockOp::Publish, FailureConfig::service("bus"));
        injector.clear_op(MockOp::Publish);
        assert!(injector.check(MockOp::Publish).is_none());
    }

    #[test]
    fn test_injected_errors_classify() {
        let ctx = FailureContext::default();

        let exec = FailureConfig::ssh(SshFailureKind::Authentication).exec_error("h", 22, "u");
        let r = classify_chain(&exec, &ctx).unwrap();
        assert_eq!(r.category, RecoveryCategory::SshAuthentication);

        let transfer = FailureConfig::service("files").transfer_error();
        let r = classify_chain(&transfer, &ctx).unwrap();
        assert_eq!(r.category, RecoveryCategory::ServiceConnection);

        let api = FailureConfig::new(InjectedFailure::Api { status: 400 }, "bad request");
        assert!(classify_chain(&api.transfer_error(), &ctx).is_none());
    }
}
