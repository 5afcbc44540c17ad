use super::messages::{WorkerCommand, WorkerId};
use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

/// The master's reference to one worker task.
///
/// Sends never block: an idle worker drains its queue immediately, so a full
/// or closed queue means the worker is gone.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    #[must_use]
    pub fn new(id: WorkerId, tx: mpsc::Sender<WorkerCommand>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Whether the worker task has dropped its command receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn buy(&self, ticker: &str) -> Result<()> {
        self.send(WorkerCommand::Buy(ticker.to_string()))
    }

    pub fn entry_filled(&self, ticker: &str) -> Result<()> {
        self.send(WorkerCommand::EntryFilled(ticker.to_string()))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(WorkerCommand::Shutdown)
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .try_send(command)
            .map_err(|e| anyhow!("Worker {} unreachable: {}", self.id, e))
    }
}
