//! Execution worker: sizes and submits one volatility-scaled bracket order
//! per assignment and cancels the entry if it does not fill in time.

use super::messages::{WorkerCommand, WorkerId, WorkerReport, WorkerStatus};
use crate::config::ExecutionConfig;
use crate::exchange::{BarRequest, BarSeries, BracketOrder, BracketOrderRequest, Brokerage};
use crate::indicators;
use crate::utils::decimal::{self, CENT};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Why a buy attempt was abandoned.
#[derive(Debug, Error, PartialEq)]
pub enum BuyError {
    #[error("market data request failed: {0}")]
    MarketData(String),

    #[error("no {horizon} bars returned for {ticker}")]
    MissingBars {
        ticker: String,
        horizon: &'static str,
    },

    #[error("no latest close for {0}")]
    MissingPrice(String),

    #[error("ATR unavailable over the {0} horizon")]
    Volatility(&'static str),

    #[error("unusable price {0}")]
    InvalidPrice(f64),

    #[error("stop distance {stop} reaches below zero from entry {entry}")]
    InvalidBracket { entry: Decimal, stop: Decimal },

    #[error("order submission failed: {0}")]
    Order(String),
}

/// Prices and size of one bracket order.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketSizing {
    pub quantity: Decimal,
    pub entry: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub coefficient: f64,
}

/// Scale the stop distance by relative volatility and size the order.
///
/// `coefficient = 1 + (max_multiplier - 1) * clamp(atr_short / atr_long, 0, 1)`.
/// Quantity comes from the unrounded close; only order prices are rounded.
/// The stop distance is rounded to cents before it is applied so the
/// take-profit and stop-loss are exactly equidistant from the entry.
pub fn size_bracket(
    budget: Decimal,
    close: f64,
    atr_short: f64,
    atr_long: f64,
    max_multiplier: f64,
) -> Result<BracketSizing, BuyError> {
    let close_price = decimal::from_f64(close)
        .filter(|price| *price > Decimal::ZERO)
        .ok_or(BuyError::InvalidPrice(close))?;
    let entry = decimal::round_to_cents(close_price);

    let ratio = atr_short / atr_long;
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let coefficient = 1.0 + (max_multiplier - 1.0) * ratio;

    let stop = decimal::from_f64(coefficient * atr_short)
        .map(decimal::round_to_cents)
        .ok_or(BuyError::InvalidPrice(coefficient * atr_short))?
        .max(CENT);

    if stop >= entry {
        return Err(BuyError::InvalidBracket { entry, stop });
    }

    Ok(BracketSizing {
        quantity: decimal::whole_shares(budget, close_price),
        entry,
        take_profit: entry + stop,
        stop_loss: entry - stop,
        coefficient,
    })
}

/// Per-worker settings, fixed at pool startup.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub budget: Decimal,
    pub max_atr_multiplier: f64,
    pub atr_period: usize,
    pub cancel_delay: Duration,
    pub short_horizon: BarRequest,
    pub long_horizon: BarRequest,
}

impl WorkerSettings {
    pub fn new(budget: Decimal, config: &ExecutionConfig) -> Self {
        Self {
            budget,
            max_atr_multiplier: config.max_atr_multiplier,
            atr_period: config.atr_period,
            cancel_delay: Duration::from_millis(config.cancel_delay_ms),
            short_horizon: BarRequest::new(config.short_bar, config.short_lookback_hours),
            long_horizon: BarRequest::new(config.long_bar, config.long_lookback_hours),
        }
    }
}

/// Armed cancellation timer for one unfilled entry.
struct Watchdog {
    ticker: String,
    order_id: String,
    task: JoinHandle<()>,
}

impl Watchdog {
    fn arm(client: Arc<dyn Brokerage>, order: &BracketOrder, delay: Duration) -> Self {
        let order_id = order.broker_order_id.clone();
        let ticker = order.symbol.clone();
        let task = {
            let order_id = order_id.clone();
            let ticker = ticker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                info!(%ticker, %order_id, "Entry unfilled after {:?}, cancelling", delay);
                if let Err(e) = client.cancel_order(&order_id).await {
                    warn!(%ticker, %order_id, "Watchdog cancel failed: {}", e);
                }
            })
        };
        Self {
            ticker,
            order_id,
            task,
        }
    }

    fn disarm(self) {
        self.task.abort();
    }
}

/// One execution unit. Owns at most one armed watchdog at a time.
pub struct Worker {
    id: WorkerId,
    client: Arc<dyn Brokerage>,
    settings: WorkerSettings,
    commands: mpsc::Receiver<WorkerCommand>,
    reports: mpsc::Sender<WorkerReport>,
    watchdog: Option<Watchdog>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        client: Arc<dyn Brokerage>,
        settings: WorkerSettings,
        commands: mpsc::Receiver<WorkerCommand>,
        reports: mpsc::Sender<WorkerReport>,
    ) -> Self {
        Self {
            id,
            client,
            settings,
            commands,
            reports,
            watchdog: None,
        }
    }

    /// Signal readiness, then serve commands until shutdown or until the
    /// master drops its handle.
    pub async fn run(mut self, ready: oneshot::Sender<()>) {
        if ready.send(()).is_err() {
            warn!(worker = self.id, "Master stopped waiting before worker was ready");
            return;
        }
        debug!(worker = self.id, "Worker ready");

        while let Some(command) = self.commands.recv().await {
            match command {
                WorkerCommand::Buy(ticker) => self.handle_buy(ticker).await,
                WorkerCommand::EntryFilled(ticker) => {
                    if self.watchdog.as_ref().is_some_and(|w| w.ticker == ticker) {
                        if let Some(watchdog) = self.watchdog.take() {
                            debug!(worker = self.id, %ticker, "Entry filled, watchdog disarmed");
                            watchdog.disarm();
                        }
                    }
                }
                WorkerCommand::Shutdown => break,
            }
        }

        self.cancel_pending_entry().await;
        debug!(worker = self.id, "Worker stopped");
    }

    async fn handle_buy(&mut self, ticker: String) {
        // a new attempt supersedes any earlier timer
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.disarm();
        }

        let status = match self.buy(&ticker).await {
            Ok(order) => {
                self.watchdog = Some(Watchdog::arm(
                    self.client.clone(),
                    &order,
                    self.settings.cancel_delay,
                ));
                WorkerStatus::OrderPlaced { ticker, order }
            }
            Err(e) => {
                warn!(worker = self.id, %ticker, "Buy failed: {}", e);
                WorkerStatus::Error {
                    ticker,
                    reason: e.to_string(),
                }
            }
        };

        if self
            .reports
            .send(WorkerReport::new(self.id, status))
            .await
            .is_err()
        {
            error!(worker = self.id, "Master report channel closed");
        }
    }

    #[instrument(skip(self), fields(worker = self.id))]
    async fn buy(&self, ticker: &str) -> Result<BracketOrder, BuyError> {
        let symbols = [ticker.to_string()];
        let (short, long) = tokio::try_join!(
            self.client
                .get_historical_data(&symbols, self.settings.short_horizon),
            self.client
                .get_historical_data(&symbols, self.settings.long_horizon),
        )
        .map_err(|e| BuyError::MarketData(format!("{:#}", e)))?;

        let short = non_empty(short.get(ticker), ticker, "short")?;
        let long = non_empty(long.get(ticker), ticker, "long")?;

        let period = self.settings.atr_period;
        let atr_short = indicators::atr(&short.high, &short.low, &short.close, period)
            .ok_or(BuyError::Volatility("short"))?;
        let atr_long = indicators::atr(&long.high, &long.low, &long.close, period)
            .ok_or(BuyError::Volatility("long"))?;

        let closes = self
            .client
            .get_latest_closing_price(&symbols)
            .await
            .map_err(|e| BuyError::MarketData(format!("{:#}", e)))?;
        let close = closes
            .get(ticker)
            .copied()
            .ok_or_else(|| BuyError::MissingPrice(ticker.to_string()))?;

        let sizing = size_bracket(
            self.settings.budget,
            close,
            atr_short,
            atr_long,
            self.settings.max_atr_multiplier,
        )?;

        debug!(
            atr_short,
            atr_long,
            coefficient = sizing.coefficient,
            qty = %sizing.quantity,
            "Bracket sized"
        );

        let request = BracketOrderRequest::limit_buy(
            ticker,
            sizing.quantity,
            sizing.entry,
            sizing.take_profit,
            sizing.stop_loss,
        );
        let response = self
            .client
            .place_bracket_order(&request)
            .await
            .map_err(|e| BuyError::Order(format!("{:#}", e)))?;

        info!(
            %ticker,
            order_id = %response.id,
            qty = %sizing.quantity,
            entry = %sizing.entry,
            take_profit = %sizing.take_profit,
            stop_loss = %sizing.stop_loss,
            "Bracket order placed"
        );

        let cancel_after = chrono::Duration::from_std(self.settings.cancel_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());

        Ok(BracketOrder {
            symbol: ticker.to_string(),
            quantity: sizing.quantity,
            entry_limit_price: sizing.entry,
            take_profit_limit_price: sizing.take_profit,
            stop_loss_stop_price: sizing.stop_loss,
            broker_order_id: response.id,
            cancel_deadline: Utc::now() + cancel_after,
        })
    }

    /// Cancel the armed entry right away instead of leaving it to the timer.
    async fn cancel_pending_entry(&mut self) {
        let Some(watchdog) = self.watchdog.take() else {
            return;
        };
        watchdog.task.abort();
        info!(
            worker = self.id,
            ticker = %watchdog.ticker,
            "Cancelling unfilled entry on shutdown"
        );
        if let Err(e) = self.client.cancel_order(&watchdog.order_id).await {
            warn!(worker = self.id, "Shutdown cancel failed: {}", e);
        }
    }
}

fn non_empty<'a>(
    series: Option<&'a BarSeries>,
    ticker: &str,
    horizon: &'static str,
) -> Result<&'a BarSeries, BuyError> {
    series
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BuyError::MissingBars {
            ticker: ticker.to_string(),
            horizon,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{BatchResponse, MockAlpacaClient, MockBrokerage, Timeframe};
    use rust_decimal_macros::dec;

    fn flat_series(close: f64, range: f64, len: usize) -> BarSeries {
        BarSeries {
            high: vec![close + range / 2.0; len],
            low: vec![close - range / 2.0; len],
            close: vec![close; len],
            volume: vec![1000.0; len],
        }
    }

    fn settings(budget: Decimal) -> WorkerSettings {
        WorkerSettings {
            cancel_delay: Duration::from_millis(50),
            ..WorkerSettings::new(budget, &ExecutionConfig::default())
        }
    }

    struct Harness {
        handle: mpsc::Sender<WorkerCommand>,
        reports: mpsc::Receiver<WorkerReport>,
        task: JoinHandle<()>,
    }

    async fn start(client: Arc<dyn Brokerage>, settings: WorkerSettings) -> Harness {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (report_tx, report_rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Worker::new(7, client, settings, cmd_rx, report_tx);
        let task = tokio::spawn(worker.run(ready_tx));
        ready_rx.await.unwrap();
        Harness {
            handle: cmd_tx,
            reports: report_rx,
            task,
        }
    }

    async fn market_with(symbol: &str, close: f64) -> MockAlpacaClient {
        let client = MockAlpacaClient::default();
        client.set_close(symbol, close).await;
        client
            .set_bars(symbol, Timeframe::FiveMin, flat_series(close, 0.10, 20))
            .await;
        client
            .set_bars(symbol, Timeframe::OneDay, flat_series(close, 0.40, 20))
            .await;
        client
    }

    #[test]
    fn test_sizing_quantity() {
        let sizing = size_bracket(dec!(30), 12.40, 0.1, 0.4, 3.0).unwrap();
        assert_eq!(sizing.quantity, dec!(2));

        let sizing = size_bracket(dec!(5), 12.40, 0.1, 0.4, 3.0).unwrap();
        assert_eq!(sizing.quantity, dec!(1));
    }

    #[test]
    fn test_quantity_uses_unrounded_close() {
        // 12.395 rounds up to 12.40, which would only buy one share
        let sizing = size_bracket(dec!(24.79), 12.395, 0.1, 0.4, 3.0).unwrap();

        assert_eq!(sizing.quantity, dec!(2));
        assert_eq!(sizing.entry, dec!(12.40));
    }

    #[test]
    fn test_sizing_is_symmetric_in_cents() {
        let sizing = size_bracket(dec!(100), 12.403, 0.1234, 0.5, 3.0).unwrap();

        assert_eq!(sizing.entry, dec!(12.40));
        assert_eq!(
            sizing.take_profit - sizing.entry,
            sizing.entry - sizing.stop_loss
        );
        assert_eq!(sizing.take_profit.scale(), 2);
    }

    #[test]
    fn test_coefficient_bounds() {
        // calm short horizon: coefficient near 1
        let calm = size_bracket(dec!(100), 20.0, 0.0, 1.0, 3.0).unwrap();
        assert_eq!(calm.coefficient, 1.0);

        // short as volatile as long: full multiplier
        let hot = size_bracket(dec!(100), 20.0, 0.5, 0.5, 3.0).unwrap();
        assert_eq!(hot.coefficient, 3.0);
        assert_eq!(hot.take_profit, dec!(21.50));
        assert_eq!(hot.stop_loss, dec!(18.50));

        // ratio above one is clamped
        let clamped = size_bracket(dec!(100), 20.0, 0.5, 0.1, 3.0).unwrap();
        assert_eq!(clamped.coefficient, 3.0);

        // zero long ATR with zero short ATR does not produce NaN
        let flat = size_bracket(dec!(100), 20.0, 0.0, 0.0, 3.0).unwrap();
        assert_eq!(flat.coefficient, 1.0);
        assert_eq!(flat.take_profit, dec!(20.01));
    }

    #[test]
    fn test_sizing_rejects_bad_inputs() {
        assert_eq!(
            size_bracket(dec!(30), 0.0, 0.1, 0.1, 3.0),
            Err(BuyError::InvalidPrice(0.0))
        );
        assert!(matches!(
            size_bracket(dec!(30), 1.0, 2.0, 2.0, 3.0),
            Err(BuyError::InvalidBracket { .. })
        ));
    }

    #[tokio::test]
    async fn test_buy_places_bracket_and_reports() {
        let client = market_with("TSLA", 12.40).await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        assert_eq!(report.worker_id, 7);
        let WorkerStatus::OrderPlaced { ticker, order } = report.status else {
            panic!("expected OrderPlaced, got {:?}", report.status);
        };
        assert_eq!(ticker, "TSLA");
        assert_eq!(order.quantity, dec!(2));
        assert_eq!(order.entry_limit_price, dec!(12.40));
        assert_eq!(
            order.take_profit_limit_price - order.entry_limit_price,
            order.entry_limit_price - order.stop_loss_stop_price
        );

        let placed = client.orders().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].limit_price, dec!(12.40));
    }

    #[tokio::test]
    async fn test_entry_uses_latest_close_not_bar_close() {
        let client = market_with("TSLA", 12.40).await;
        client.set_close("TSLA", 20.00).await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        let WorkerStatus::OrderPlaced { order, .. } = report.status else {
            panic!("expected OrderPlaced, got {:?}", report.status);
        };
        assert_eq!(order.entry_limit_price, dec!(20.00));
        assert_eq!(order.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_missing_latest_close_reports_error() {
        let client = MockAlpacaClient::default();
        client
            .set_bars("TSLA", Timeframe::FiveMin, flat_series(12.40, 0.1, 20))
            .await;
        client
            .set_bars("TSLA", Timeframe::OneDay, flat_series(12.40, 0.4, 20))
            .await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        let WorkerStatus::Error { ticker, reason } = report.status else {
            panic!("expected Error, got {:?}", report.status);
        };
        assert_eq!(ticker, "TSLA");
        assert_eq!(reason, BuyError::MissingPrice("TSLA".to_string()).to_string());
        assert!(client.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_watchdog_cancels_unfilled_entry() {
        let client = market_with("TSLA", 12.40).await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let _ = harness.reports.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.cancels().await, vec!["mock-1".to_string()]);
    }

    #[tokio::test]
    async fn test_entry_filled_disarms_watchdog() {
        let client = market_with("TSLA", 12.40).await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let _ = harness.reports.recv().await.unwrap();
        harness
            .handle
            .send(WorkerCommand::EntryFilled("TSLA".to_string()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(client.cancels().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_armed_entry() {
        let client = market_with("TSLA", 12.40).await;
        let mut settings = settings(dec!(30));
        settings.cancel_delay = Duration::from_secs(60);
        let mut harness = start(Arc::new(client.clone()), settings).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let _ = harness.reports.recv().await.unwrap();
        harness.handle.send(WorkerCommand::Shutdown).await.unwrap();
        harness.task.await.unwrap();

        assert_eq!(client.cancels().await, vec!["mock-1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_long_bars_reports_error() {
        let client = MockAlpacaClient::default();
        client
            .set_bars("TSLA", Timeframe::FiveMin, flat_series(12.40, 0.1, 20))
            .await;
        let mut harness = start(Arc::new(client.clone()), settings(dec!(30))).await;

        harness
            .handle
            .send(WorkerCommand::Buy("TSLA".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        assert!(matches!(
            report.status,
            WorkerStatus::Error { ref ticker, .. } if ticker == "TSLA"
        ));
        assert!(client.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_reports_error() {
        let mut mock = MockBrokerage::new();
        mock.expect_get_historical_data()
            .returning(|_, _| Err(anyhow::anyhow!("503 Service Unavailable")));
        mock.expect_place_bracket_order().never();

        let mut harness = start(Arc::new(mock), settings(dec!(30))).await;
        harness
            .handle
            .send(WorkerCommand::Buy("AAPL".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        let WorkerStatus::Error { reason, .. } = report.status else {
            panic!("expected Error");
        };
        assert!(reason.contains("503"));
    }

    #[tokio::test]
    async fn test_rejected_order_reports_error() {
        let mut mock = MockBrokerage::new();
        mock.expect_get_historical_data().returning(|symbols, request| {
            let range = if request.timeframe == Timeframe::OneDay {
                0.4
            } else {
                0.1
            };
            let entries = symbols
                .iter()
                .map(|s| (s.clone(), Some(flat_series(12.40, range, 20))))
                .collect();
            Ok(BatchResponse::new(entries, false))
        });
        mock.expect_get_latest_closing_price().returning(|symbols| {
            let entries = symbols.iter().map(|s| (s.clone(), Some(12.40))).collect();
            Ok(BatchResponse::new(entries, false))
        });
        mock.expect_place_bracket_order()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("insufficient buying power")));

        let mut harness = start(Arc::new(mock), settings(dec!(30))).await;
        harness
            .handle
            .send(WorkerCommand::Buy("AAPL".to_string()))
            .await
            .unwrap();
        let report = harness.reports.recv().await.unwrap();

        let WorkerStatus::Error { reason, .. } = report.status else {
            panic!("expected Error");
        };
        assert!(reason.contains("insufficient buying power"));
    }
}
