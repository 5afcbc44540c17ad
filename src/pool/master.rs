//! Master actor: owns the worker pool and serializes every event that
//! mutates it through one select loop.

use super::messages::{WorkerReport, WorkerStatus};
use super::registry::{WorkerPool, WorkerSpawner};
use super::spawner::WorkerFactory;
use super::worker::WorkerSettings;
use crate::config::{ExecutionConfig, PoolConfig};
use crate::exchange::{Account, Brokerage, OrderSide, StreamEvent, TradeEvent, TradeUpdate};
use crate::persistence::{OrderStatus, PersistenceManager};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const REPORT_QUEUE: usize = 64;

/// Cash allotted to each ticker, fixed for the life of the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget(Decimal);

impl Budget {
    pub fn from_account(account: &Account, allocation_ratio: Decimal) -> Self {
        Self(account.cash * allocation_ratio)
    }

    pub fn per_ticker(&self) -> Decimal {
        self.0
    }
}

pub struct Master {
    pool: WorkerPool,
    spawner: Box<dyn WorkerSpawner>,
    reports_rx: mpsc::Receiver<WorkerReport>,
    assign_interval: Duration,
    persistence: Option<Arc<PersistenceManager>>,
}

impl Master {
    /// Snapshot the account once to fix the per-ticker budget, then build a
    /// master whose workers trade through `client`.
    pub async fn start(
        client: Arc<dyn Brokerage>,
        pool: &PoolConfig,
        execution: &ExecutionConfig,
    ) -> Result<Self> {
        let account = client
            .get_account()
            .await
            .context("Failed to fetch account for budget")?;
        let budget = Budget::from_account(&account, pool.allocation_ratio);
        info!(
            cash = %account.cash,
            ratio = %pool.allocation_ratio,
            budget = %budget.per_ticker(),
            "Per-ticker budget fixed"
        );

        let (reports_tx, reports_rx) = mpsc::channel(REPORT_QUEUE);
        let factory = WorkerFactory::new(
            client,
            WorkerSettings::new(budget.per_ticker(), execution),
            reports_tx,
            Duration::from_secs(pool.ready_timeout_secs),
        );

        Ok(Self::with_spawner(pool, Box::new(factory), reports_rx))
    }

    /// Master over an arbitrary spawner; `reports_rx` must receive what the
    /// spawned workers report.
    pub fn with_spawner(
        config: &PoolConfig,
        spawner: Box<dyn WorkerSpawner>,
        reports_rx: mpsc::Receiver<WorkerReport>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(config.max_workers, config.release_on_error),
            spawner,
            reports_rx,
            assign_interval: Duration::from_secs(config.assign_interval_secs.max(1)),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Serve until `shutdown` turns true, then tell every worker to stop.
    /// Returns the pool as it stood at shutdown.
    pub async fn run(
        mut self,
        mut candidates: watch::Receiver<Vec<String>>,
        mut events: mpsc::Receiver<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerPool {
        let mut interval = tokio::time::interval(self.assign_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut candidates_open = true;
        let mut events_open = true;

        info!(
            max_workers = self.pool.max_workers(),
            interval = ?self.assign_interval,
            "Master started"
        );

        loop {
            tokio::select! {
                biased;

                Some(report) = self.reports_rx.recv() => self.on_report(report),

                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_stream_event(event),
                    None => {
                        error!("Trade stream closed, positions will not be released");
                        events_open = false;
                    }
                },

                changed = candidates.changed(), if candidates_open => match changed {
                    Ok(()) => {
                        let list = candidates.borrow_and_update().clone();
                        self.pool.receive_candidates(list);
                    }
                    Err(_) => {
                        warn!("Scanner stopped publishing candidates");
                        candidates_open = false;
                    }
                },

                _ = interval.tick() => {
                    self.pool.assign(self.spawner.as_ref()).await;
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            active = ?self.pool.active_tickers(),
            available = self.pool.available_len(),
            "Master stopping"
        );
        self.pool.shutdown_all();
        self.pool
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected => info!("Trade stream connected"),
            StreamEvent::Disconnected => {
                error!("Trade stream disconnected, workers stay assigned until it returns")
            }
            StreamEvent::TradeUpdate(update) => {
                self.record_trade_update(&update);
                self.pool.handle_trade_update(&update);
            }
        }
    }

    fn on_report(&mut self, report: WorkerReport) {
        if let WorkerStatus::OrderPlaced { order, .. } = &report.status {
            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.record_order(order) {
                    warn!("Failed to persist order: {}", e);
                }
            }
        }
        self.pool.handle_report(&report);
    }

    fn record_trade_update(&self, update: &TradeUpdate) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let status = match (update.side(), update.event) {
            (OrderSide::Buy, TradeEvent::Fill) => OrderStatus::EntryFilled,
            (OrderSide::Sell, TradeEvent::Fill) => OrderStatus::Closed,
            (OrderSide::Buy, TradeEvent::Canceled) => OrderStatus::Canceled,
            _ => return,
        };
        if let Err(e) = persistence.update_order_status(update.symbol(), status) {
            warn!(symbol = update.symbol(), "Failed to persist order status: {}", e);
        }
    }
}
