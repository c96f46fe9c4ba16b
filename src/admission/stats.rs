//! Admission statistics snapshot.

use serde::Serialize;

/// Point-in-time view of the admission controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionStats {
    pub enabled: bool,
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
    /// Calls that got past admission (immediately or after queueing).
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Calls that left the queue early or ended in cancellation/deadline.
    pub cancelled: u64,
    pub utilization_percent: f64,
    /// Age of the head of the queue.
    pub oldest_wait_ms: u64,
    /// Moving average of observed execution time.
    pub avg_execution_ms: f64,
}

impl AdmissionStats {
    pub fn is_idle(&self) -> bool {
        self.running == 0 && self.queued == 0
    }
}
