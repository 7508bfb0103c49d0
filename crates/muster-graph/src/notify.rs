//! Status notifications and follow-up jobs.
//!
//! Mutating operations publish coarse status changes for interested
//! listeners and enqueue follow-up work (re-aggregation, deferred
//! deletion) instead of running it inline. Both channels are in-process;
//! bridging them to an external broker is the caller's concern.

use muster_core::InventoryId;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Coarse inventory lifecycle states worth announcing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    PendingDeletion,
    Deleted,
}

impl std::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingDeletion => write!(f, "pending_deletion"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A status-change notification.
///
/// Emitted only after the owning write has been persisted, so a listener
/// never observes a state the store could still roll back.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    /// Channel grouping for consumers; always "inventories" today.
    pub group_name: &'static str,
    pub inventory_id: InventoryId,
    pub status: InventoryStatus,
}

impl StatusEvent {
    pub fn new(inventory_id: InventoryId, status: InventoryStatus) -> Self {
        Self {
            group_name: "inventories",
            inventory_id,
            status,
        }
    }
}

/// Fan-out sender for status events. Cheap to clone; dropping every
/// receiver just makes emission a no-op.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        debug!(inventory = %event.inventory_id, status = %event.status, "status change");
        // No receivers is fine; the event is simply dropped.
        let _ = self.tx.send(event);
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Deferred work requested by a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Re-run aggregation for an inventory.
    UpdateComputedFields(InventoryId),
    /// Tear down an inventory scheduled for deletion.
    DeleteInventory(InventoryId),
}

/// Producer half of the follow-up job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn enqueue(&self, job: Job) {
        debug!(?job, "enqueued follow-up job");
        // The queue outlives every producer in practice; if the runner is
        // gone the job is dropped, and the next scheduled run converges.
        let _ = self.tx.send(job);
    }
}

/// Consumer half of the follow-up job queue.
pub struct JobRunner {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl JobRunner {
    /// Takes every job currently queued without waiting for more.
    pub fn drain(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    /// Waits for the next job; `None` once every producer is gone.
    pub async fn next_job(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}

/// Creates a connected job queue and runner.
pub fn job_channel() -> (JobQueue, JobRunner) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobRunner { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_drain_in_order() {
        let (queue, mut runner) = job_channel();
        queue.enqueue(Job::UpdateComputedFields(InventoryId(1)));
        queue.enqueue(Job::DeleteInventory(InventoryId(2)));
        assert_eq!(
            runner.drain(),
            vec![
                Job::UpdateComputedFields(InventoryId(1)),
                Job::DeleteInventory(InventoryId(2)),
            ]
        );
        assert!(runner.drain().is_empty());
    }

    #[test]
    fn test_emit_without_receivers_is_harmless() {
        let broadcaster = StatusBroadcaster::default();
        broadcaster.emit(StatusEvent::new(
            InventoryId(1),
            InventoryStatus::PendingDeletion,
        ));
    }

    #[test]
    fn test_subscribers_see_events() {
        let broadcaster = StatusBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        broadcaster.emit(StatusEvent::new(InventoryId(3), InventoryStatus::Deleted));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.inventory_id, InventoryId(3));
        assert_eq!(event.status, InventoryStatus::Deleted);
        assert_eq!(event.group_name, "inventories");
    }
}
