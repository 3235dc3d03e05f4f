//! Async command mailbox
//!
//! Each running job has one [`CommandSlot`]. The message bus delivers into it
//! through the [`CommandRegistry`]; polling loops take from it at their
//! checkpoints. Both sides go through one mutex so a command is observed
//! exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use jobflow_protocol::AsyncCommand;

/// Result of storing a command in a [`CommandSlot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The command is pending, replacing whatever was there before
    Stored { displaced: Option<AsyncCommand> },
    /// A pending CANCEL kept its place; the new command was dropped
    Rejected(AsyncCommand),
}

/// Single-item mailbox for one job
#[derive(Debug, Default)]
pub struct CommandSlot {
    inner: Mutex<Option<AsyncCommand>>,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<AsyncCommand>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Read and clear the pending command
    pub fn take(&self) -> Option<AsyncCommand> {
        self.lock().take()
    }

    /// Store a command over any pending one.
    ///
    /// A pending CANCEL is never displaced by a weaker command.
    pub fn replace(&self, command: AsyncCommand) -> Delivery {
        let mut slot = self.lock();
        if *slot == Some(AsyncCommand::Cancel) && command != AsyncCommand::Cancel {
            return Delivery::Rejected(command);
        }
        Delivery::Stored {
            displaced: slot.replace(command),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

/// Slots of the jobs this process currently owns
#[derive(Debug, Default)]
pub struct CommandRegistry {
    slots: Mutex<HashMap<Uuid, Arc<CommandSlot>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<CommandSlot>>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Slot for a job, created on first use
    pub fn register(&self, job_uuid: Uuid) -> Arc<CommandSlot> {
        self.lock().entry(job_uuid).or_default().clone()
    }

    pub fn unregister(&self, job_uuid: Uuid) {
        self.lock().remove(&job_uuid);
    }

    /// Deliver a command to the owning worker; false if no worker owns the job
    pub fn deliver(&self, job_uuid: Uuid, command: AsyncCommand) -> bool {
        let slot = self.lock().get(&job_uuid).cloned();
        match slot {
            Some(slot) => {
                match slot.replace(command) {
                    Delivery::Stored { displaced } => {
                        debug!(%job_uuid, %command, ?displaced, "async command delivered")
                    }
                    Delivery::Rejected(_) => {
                        debug!(%job_uuid, %command, "async command dropped behind pending cancel")
                    }
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_take_clears() {
        let slot = CommandSlot::new();
        assert_eq!(
            slot.replace(AsyncCommand::Pause),
            Delivery::Stored { displaced: None }
        );
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(AsyncCommand::Pause));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_cancel_not_displaced_by_pause() {
        let slot = CommandSlot::new();
        slot.replace(AsyncCommand::Cancel);
        assert_eq!(
            slot.replace(AsyncCommand::Pause),
            Delivery::Rejected(AsyncCommand::Pause)
        );
        assert_eq!(slot.take(), Some(AsyncCommand::Cancel));
    }

    #[test]
    fn test_replace_reports_displaced_command() {
        let slot = CommandSlot::new();
        slot.replace(AsyncCommand::Pause);
        assert_eq!(
            slot.replace(AsyncCommand::Cancel),
            Delivery::Stored {
                displaced: Some(AsyncCommand::Pause)
            }
        );
        assert_eq!(
            slot.replace(AsyncCommand::Cancel),
            Delivery::Stored {
                displaced: Some(AsyncCommand::Cancel)
            }
        );
        assert_eq!(slot.take(), Some(AsyncCommand::Cancel));
    }

    #[test]
    fn test_concurrent_delivery_observed_once() {
        let registry = Arc::new(CommandRegistry::new());
        let job = Uuid::new_v4();
        let slot = registry.register(job);

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.deliver(job, AsyncCommand::Cancel))
            })
            .collect();
        for p in producers {
            assert!(p.join().unwrap());
        }

        assert_eq!(slot.take(), Some(AsyncCommand::Cancel));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_deliver_to_unknown_job() {
        let registry = CommandRegistry::new();
        assert!(!registry.deliver(Uuid::new_v4(), AsyncCommand::Cancel));
    }
}
