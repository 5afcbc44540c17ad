use super::handle::WorkerHandle;
use super::messages::{WorkerId, WorkerReport, WorkerStatus};
use super::registry::WorkerSpawner;
use super::worker::{Worker, WorkerSettings};
use crate::exchange::Brokerage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const COMMAND_QUEUE: usize = 16;

/// Spawns [`Worker`] tasks wired to the master's report channel.
///
/// Each worker gets a supervisor task that reports `Exited` when the worker
/// returns or panics, so the pool can drop the handle.
pub struct WorkerFactory {
    client: Arc<dyn Brokerage>,
    settings: WorkerSettings,
    reports: mpsc::Sender<WorkerReport>,
    ready_timeout: Duration,
}

impl WorkerFactory {
    pub fn new(
        client: Arc<dyn Brokerage>,
        settings: WorkerSettings,
        reports: mpsc::Sender<WorkerReport>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            client,
            settings,
            reports,
            ready_timeout,
        }
    }
}

#[async_trait]
impl WorkerSpawner for WorkerFactory {
    async fn spawn(&self, id: WorkerId) -> Result<WorkerHandle> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = Worker::new(
            id,
            self.client.clone(),
            self.settings.clone(),
            command_rx,
            self.reports.clone(),
        );
        let task = tokio::spawn(worker.run(ready_tx));

        let reports = self.reports.clone();
        tokio::spawn(async move {
            let panicked = match task.await {
                Ok(()) => false,
                Err(e) => e.is_panic(),
            };
            let exited = WorkerReport::new(id, WorkerStatus::Exited { panicked });
            if reports.send(exited).await.is_err() {
                debug!(worker = id, "Exit not reported, master already stopped");
            }
        });

        tokio::time::timeout(self.ready_timeout, ready_rx)
            .await
            .with_context(|| format!("Worker {} not ready after {:?}", id, self.ready_timeout))?
            .with_context(|| format!("Worker {} stopped before becoming ready", id))?;

        Ok(WorkerHandle::new(id, command_tx))
    }
}
