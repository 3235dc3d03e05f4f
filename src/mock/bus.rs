//! In-memory message bus and event sink

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use crate::ports::{BusError, EventError, EventSink, JobEvent, MessageBus, Queue};

#[derive(Debug, Default)]
struct BusState {
    queues: HashMap<Queue, Vec<String>>,
    failures: FailureInjector,
}

/// FIFO queues held in memory
#[derive(Debug, Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Messages waiting on a queue, without removing them
    pub fn peek(&self, queue: Queue) -> Vec<String> {
        self.lock().queues.get(&queue).cloned().unwrap_or_default()
    }

    pub fn len(&self, queue: Queue) -> usize {
        self.lock().queues.get(&queue).map_or(0, Vec::len)
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, queue: Queue, payload: &str) -> Result<(), BusError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.check(MockOp::Publish) {
            return Err(failure.bus_error(queue.as_str()));
        }
        state
            .queues
            .entry(queue)
            .or_default()
            .push(payload.to_string());
        Ok(())
    }

    fn drain(&self, queue: Queue) -> Result<Vec<String>, BusError> {
        Ok(self.lock().queues.remove(&queue).unwrap_or_default())
    }
}

/// Event sink that keeps every event
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<JobEvent>>,
    fail: Mutex<bool>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Make every later `record` call fail
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: &JobEvent) -> Result<(), EventError> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(EventError("sink offline".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}
