//! Worker partitions and the assignment pass.

use super::handle::WorkerHandle;
use super::messages::{WorkerId, WorkerReport, WorkerStatus};
use crate::exchange::{OrderSide, TradeEvent, TradeUpdate};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

/// Creates a worker and waits until it is ready for commands.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, id: WorkerId) -> Result<WorkerHandle>;
}

/// Outcome of one assignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentSummary {
    pub assigned: usize,
    pub created: usize,
}

/// Capacity-bounded set of workers split into Active (ticker → handle) and
/// Available (idle FIFO). Every live handle is in exactly one partition.
pub struct WorkerPool {
    max_workers: usize,
    release_on_error: bool,
    active: HashMap<String, WorkerHandle>,
    available: VecDeque<WorkerHandle>,
    candidates: VecDeque<String>,
    next_worker_id: WorkerId,
}

impl WorkerPool {
    pub fn new(max_workers: usize, release_on_error: bool) -> Self {
        Self {
            max_workers,
            release_on_error,
            active: HashMap::new(),
            available: VecDeque::new(),
            candidates: VecDeque::new(),
            next_worker_id: 1,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn available_len(&self) -> usize {
        self.available.len()
    }

    pub fn total_workers(&self) -> usize {
        self.active.len() + self.available.len()
    }

    pub fn is_active(&self, ticker: &str) -> bool {
        self.active.contains_key(ticker)
    }

    /// Active tickers, sorted.
    pub fn active_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.active.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn pending_candidates(&self) -> Vec<String> {
        self.candidates.iter().cloned().collect()
    }

    /// Replace the pending candidate queue. The newest list always wins.
    pub fn receive_candidates(&mut self, list: Vec<String>) {
        debug!(
            count = list.len(),
            dropped = self.candidates.len(),
            "Candidate queue replaced"
        );
        self.candidates = list.into();
    }

    /// Hand candidates to idle workers first, then grow the pool up to
    /// capacity for whatever is left.
    pub async fn assign(&mut self, spawner: &dyn WorkerSpawner) -> AssignmentSummary {
        let mut summary = AssignmentSummary::default();

        while !self.available.is_empty() {
            let Some(ticker) = self.next_candidate() else {
                break;
            };
            let Some(handle) = self.available.pop_front() else {
                break;
            };
            if self.dispatch(handle, ticker) {
                summary.assigned += 1;
            }
        }

        while self.total_workers() < self.max_workers {
            let Some(ticker) = self.next_candidate() else {
                break;
            };

            let id = self.next_worker_id;
            self.next_worker_id += 1;
            let handle = match spawner.spawn(id).await {
                Ok(handle) => handle,
                Err(e) => {
                    error!(worker = id, "Failed to start worker: {}", e);
                    self.candidates.push_front(ticker);
                    break;
                }
            };
            summary.created += 1;
            info!(worker = id, "Worker created");

            if self.dispatch(handle, ticker) {
                summary.assigned += 1;
            }
        }

        self.check_capacity();
        if summary.assigned > 0 || summary.created > 0 {
            info!(
                assigned = summary.assigned,
                created = summary.created,
                active = self.active.len(),
                available = self.available.len(),
                capacity = self.max_workers,
                "Assignment pass complete"
            );
        }
        summary
    }

    /// Apply a trade update. Returns true when a worker was freed.
    ///
    /// A filled sell closes the position; a canceled buy means the entry never
    /// opened. A filled buy only disarms the worker's watchdog.
    pub fn handle_trade_update(&mut self, update: &TradeUpdate) -> bool {
        let ticker = update.symbol();
        match (update.side(), update.event) {
            (OrderSide::Sell, TradeEvent::Fill) | (OrderSide::Buy, TradeEvent::Canceled) => {
                self.release(ticker)
            }
            (OrderSide::Buy, TradeEvent::Fill) => {
                if let Some(handle) = self.active.get(ticker) {
                    if let Err(e) = handle.entry_filled(ticker) {
                        warn!(ticker, "Could not notify worker of fill: {}", e);
                    }
                }
                false
            }
            _ => false,
        }
    }

    /// Apply a worker report to the partitions.
    pub fn handle_report(&mut self, report: &WorkerReport) {
        match &report.status {
            WorkerStatus::OrderPlaced { ticker, order } => {
                debug!(
                    worker = report.worker_id,
                    ticker,
                    order_id = %order.broker_order_id,
                    "Worker placed order"
                );
            }
            WorkerStatus::Error { ticker, reason } => {
                warn!(worker = report.worker_id, ticker, reason, "Worker buy failed");
                let owns_ticker = self
                    .active
                    .get(ticker)
                    .is_some_and(|handle| handle.id() == report.worker_id);
                if self.release_on_error && owns_ticker {
                    self.release(ticker);
                }
            }
            WorkerStatus::Exited { panicked } => self.handle_exit(report.worker_id, *panicked),
        }
    }

    /// Forget a worker that stopped. Its ticker, if any, is abandoned.
    pub fn handle_exit(&mut self, worker_id: WorkerId, panicked: bool) {
        let abandoned: Vec<String> = self
            .active
            .iter()
            .filter(|(_, handle)| handle.id() == worker_id)
            .map(|(ticker, _)| ticker.clone())
            .collect();
        for ticker in &abandoned {
            self.active.remove(ticker);
        }
        self.available.retain(|handle| handle.id() != worker_id);

        if panicked {
            error!(worker = worker_id, ?abandoned, "Worker crashed");
        } else {
            info!(worker = worker_id, ?abandoned, "Worker exited");
        }
    }

    /// Move the worker holding `ticker` back to Available.
    pub fn release(&mut self, ticker: &str) -> bool {
        let Some(handle) = self.active.remove(ticker) else {
            debug!(ticker, "Release for inactive ticker ignored");
            return false;
        };
        if handle.is_closed() {
            warn!(worker = handle.id(), ticker, "Released worker already stopped");
            return false;
        }
        info!(worker = handle.id(), ticker, "Worker released");
        self.available.push_back(handle);
        true
    }

    /// Ask every worker to stop.
    pub fn shutdown_all(&mut self) {
        for handle in self.active.values().chain(self.available.iter()) {
            if let Err(e) = handle.shutdown() {
                debug!("Shutdown not delivered: {}", e);
            }
        }
        info!(workers = self.total_workers(), "Shutdown sent to all workers");
    }

    fn next_candidate(&mut self) -> Option<String> {
        while let Some(ticker) = self.candidates.pop_front() {
            if self.active.contains_key(&ticker) {
                debug!(ticker, "Candidate already active, skipped");
                continue;
            }
            return Some(ticker);
        }
        None
    }

    /// Send `Buy` and move the handle to Active. A handle that cannot take
    /// the command is discarded and the pool shrinks by one.
    fn dispatch(&mut self, handle: WorkerHandle, ticker: String) -> bool {
        if let Err(e) = handle.buy(&ticker) {
            warn!(
                worker = handle.id(),
                ticker,
                reason = %e,
                total = self.total_workers(),
                "Worker discarded, buy not delivered"
            );
            self.candidates.push_front(ticker);
            return false;
        }
        debug!(worker = handle.id(), ticker, "Ticker assigned");
        self.active.insert(ticker, handle);
        true
    }

    fn check_capacity(&self) {
        let total = self.total_workers();
        if total > self.max_workers {
            error!(
                total,
                max_workers = self.max_workers,
                "Worker pool over capacity"
            );
        }
    }
}
