//! Messages exchanged between the master and its workers.

use crate::exchange::BracketOrder;

/// Stable identity of a worker for its whole lifetime.
pub type WorkerId = u64;

/// Master → worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Size and submit a bracket order for the ticker
    Buy(String),
    /// The entry order for the ticker filled; stop the cancellation watchdog
    EntryFilled(String),
    /// Cancel any unfilled entry and exit
    Shutdown,
}

/// Worker → master.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStatus {
    OrderPlaced { ticker: String, order: BracketOrder },
    Error { ticker: String, reason: String },
    Exited { panicked: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
}

impl WorkerReport {
    pub fn new(worker_id: WorkerId, status: WorkerStatus) -> Self {
        Self { worker_id, status }
    }
}
