//! In-memory transfer service
//!
//! Each transfer created (or seeded) gets a scripted status sequence; every
//! `get_transfer_task` call advances one step and the final status repeats.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use jobflow_protocol::{TransferRequest, TransferStatus, TransferTask};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use crate::ports::{TransferClient, TransferClientError, TransferClientFactory};

#[derive(Debug)]
struct Scripted {
    statuses: VecDeque<TransferStatus>,
    error_message: Option<String>,
}

#[derive(Debug, Default)]
struct TransferState {
    transfers: HashMap<String, Scripted>,
    /// Status sequence given to transfers created through the client
    default_script: Vec<TransferStatus>,
    created: Vec<TransferRequest>,
    cancelled: Vec<String>,
    polls: u32,
    clients: u32,
    next_id: u32,
    failures: FailureInjector,
}

/// Shared transfer service state; clients handed out by the factory all see it
#[derive(Debug, Default)]
pub struct MockTransferService {
    state: Mutex<TransferState>,
}

impl MockTransferService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a transfer with the statuses it will report
    pub fn script(&self, transfer_id: &str, statuses: Vec<TransferStatus>) {
        self.lock().transfers.insert(
            transfer_id.to_string(),
            Scripted {
                statuses: statuses.into(),
                error_message: None,
            },
        );
    }

    /// Error text reported alongside FAILED or CANCELLED
    pub fn set_error_message(&self, transfer_id: &str, message: &str) {
        if let Some(t) = self.lock().transfers.get_mut(transfer_id) {
            t.error_message = Some(message.to_string());
        }
    }

    /// Statuses for transfers created through `create_transfer`
    pub fn script_created(&self, statuses: Vec<TransferStatus>) {
        self.lock().default_script = statuses;
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn created(&self) -> Vec<TransferRequest> {
        self.lock().created.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    /// Status requests answered or failed
    pub fn polls(&self) -> u32 {
        self.lock().polls
    }

    /// Clients handed out by the factory
    pub fn clients(&self) -> u32 {
        self.lock().clients
    }
}

/// Client view over a [`MockTransferService`]
#[derive(Debug)]
pub struct MockTransferClient {
    service: Arc<MockTransferService>,
}

impl TransferClient for MockTransferClient {
    fn get_transfer_task(&self, transfer_id: &str) -> Result<TransferTask, TransferClientError> {
        let mut state = self.service.lock();
        state.polls += 1;
        if let Some(failure) = state.failures.check(MockOp::TransferStatus) {
            return Err(failure.transfer_error());
        }

        let scripted = state.transfers.get_mut(transfer_id).ok_or_else(|| {
            TransferClientError::Api {
                status: 404,
                message: format!("transfer {} not found", transfer_id),
            }
        })?;

        let status = if scripted.statuses.len() > 1 {
            scripted.statuses.pop_front()
        } else {
            scripted.statuses.front().cloned()
        }
        .unwrap_or(TransferStatus::InProgress);

        Ok(TransferTask {
            id: transfer_id.to_string(),
            error_message: status
                .is_terminal()
                .then(|| scripted.error_message.clone())
                .flatten(),
            status,
            updated: None,
        })
    }

    fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferTask, TransferClientError> {
        let mut state = self.service.lock();
        if let Some(failure) = state.failures.check(MockOp::CreateTransfer) {
            return Err(failure.transfer_error());
        }

        state.next_id += 1;
        let id = format!("xfer-{}", state.next_id);
        let statuses = if state.default_script.is_empty() {
            vec![TransferStatus::Completed]
        } else {
            state.default_script.clone()
        };
        state.transfers.insert(
            id.clone(),
            Scripted {
                statuses: statuses.into(),
                error_message: None,
            },
        );
        state.created.push(request.clone());

        Ok(TransferTask {
            id,
            status: TransferStatus::Accepted,
            error_message: None,
            updated: None,
        })
    }

    fn cancel_transfer(&self, transfer_id: &str) -> Result<(), TransferClientError> {
        let mut state = self.service.lock();
        if let Some(failure) = state.failures.check(MockOp::CancelTransfer) {
            return Err(failure.transfer_error());
        }
        state.cancelled.push(transfer_id.to_string());
        Ok(())
    }

    fn ping(&self) -> Result<(), TransferClientError> {
        let mut state = self.service.lock();
        match state.failures.check(MockOp::TransferPing) {
            Some(failure) => Err(failure.transfer_error()),
            None => Ok(()),
        }
    }
}

impl TransferClientFactory for Arc<MockTransferService> {
    fn client(
        &self,
        _tenant: &str,
        _user: &str,
    ) -> Result<Arc<dyn TransferClient>, TransferClientError> {
        let mut state = self.lock();
        state.clients += 1;
        if let Some(failure) = state.failures.check(MockOp::TransferClient) {
            return Err(failure.transfer_error());
        }
        Ok(Arc::new(MockTransferClient {
            service: self.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_statuses() {
        let service = MockTransferService::new();
        service.script(
            "t-1",
            vec![TransferStatus::InProgress, TransferStatus::Failed],
        );
        service.set_error_message("t-1", "permission denied on target");
        let client = service.client("dev", "alice").unwrap();

        let first = client.get_transfer_task("t-1").unwrap();
        assert_eq!(first.status, TransferStatus::InProgress);
        assert!(first.error_message.is_none());

        let second = client.get_transfer_task("t-1").unwrap();
        assert_eq!(second.status, TransferStatus::Failed);
        assert_eq!(
            second.error_message.as_deref(),
            Some("permission denied on target")
        );
        assert_eq!(service.polls(), 2);
    }

    #[test]
    fn test_create_and_cancel() {
        let service = MockTransferService::new();
        let client = service.client("dev", "alice").unwrap();
        let task = client
            .create_transfer(&TransferRequest {
                tag: "job".to_string(),
                elements: vec![],
            })
            .unwrap();
        assert_eq!(task.id, "xfer-1");
        assert_eq!(
            client.get_transfer_task("xfer-1").unwrap().status,
            TransferStatus::Completed
        );

        client.cancel_transfer("xfer-1").unwrap();
        assert_eq!(service.cancelled(), vec!["xfer-1".to_string()]);
    }

    #[test]
    fn test_unknown_transfer_is_api_error() {
        let service = MockTransferService::new();
        let client = service.client("dev", "alice").unwrap();
        let err = client.get_transfer_task("missing").unwrap_err();
        assert!(!err.is_recoverable());
    }
}
