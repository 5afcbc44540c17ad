//! Stock scanner: narrows the tradable universe to a candidate set on a timer.

use super::filter::{run_pipeline, FilterStage};
use super::stages::{candidate_stages, seed_stages};
use crate::config::{FilterConfig, ScannerConfig};
use crate::exchange::Brokerage;
use crate::persistence::PersistenceManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

/// Runs the filter pipeline and publishes candidate sets to the worker pool.
pub struct StockScanner {
    client: Arc<dyn Brokerage>,
    seed_stages: Vec<FilterStage>,
    candidate_stages: Vec<FilterStage>,
    refresh: Duration,
    persistence: Option<Arc<PersistenceManager>>,
}

impl StockScanner {
    pub fn new(client: Arc<dyn Brokerage>, filters: &FilterConfig, scanner: &ScannerConfig) -> Self {
        Self {
            client,
            seed_stages: seed_stages(filters),
            candidate_stages: candidate_stages(filters),
            refresh: Duration::from_secs(scanner.refresh_secs.max(1)),
            persistence: None,
        }
    }

    /// Record seed lists and candidate sets in `persistence`.
    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Tradable universe narrowed by price and daily volume.
    ///
    /// Symbols containing `.` (share classes, units) are dropped before any
    /// market data is requested.
    #[instrument(skip(self))]
    pub async fn get_potential_tickers(&self) -> Result<Vec<String>> {
        let universe = self
            .client
            .get_assets()
            .await
            .context("Failed to fetch tradable assets")?;

        let plain: Vec<String> = universe
            .into_iter()
            .filter(|symbol| !symbol.contains('.'))
            .collect();

        let seed = run_pipeline(self.client.as_ref(), &plain, &self.seed_stages).await;

        info!(
            universe = plain.len(),
            seed = seed.len(),
            "Seed list built"
        );

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.record_seed_list(&seed) {
                warn!("Failed to persist seed list: {}", e);
            }
        }

        Ok(seed)
    }

    /// Candidates among `tickers` that pass recent volume, spread, EMA, ADX
    /// and MACD, in that order.
    #[instrument(skip(self, tickers), fields(input = tickers.len()))]
    pub async fn find_suitable_tickers(&self, tickers: &[String]) -> Vec<String> {
        run_pipeline(self.client.as_ref(), tickers, &self.candidate_stages).await
    }

    /// Build the seed list once, then republish a fresh candidate set every
    /// refresh interval until `shutdown` flips to true.
    pub async fn run(
        self,
        candidates_tx: watch::Sender<Vec<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let seed = self.get_potential_tickers().await?;
        if seed.is_empty() {
            warn!("Seed list is empty, scans will publish empty candidate sets");
        }

        let mut interval = tokio::time::interval(self.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan_count = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let candidates = self.find_suitable_tickers(&seed).await;
            scan_count += 1;
            info!(
                scan = scan_count,
                candidates = candidates.len(),
                "Scan complete: {:?}",
                candidates
            );

            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.record_candidate_set(&candidates) {
                    warn!("Failed to persist candidate set: {}", e);
                }
            }

            if candidates_tx.send(candidates).is_err() {
                warn!("Candidate receiver dropped, result discarded");
            }
        }

        info!(scans = scan_count, "Scanner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{BarSeries, MockAlpacaClient, Quote, Timeframe};

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn series(close: Vec<f64>, volume: f64) -> BarSeries {
        BarSeries {
            high: close.iter().map(|c| c + 0.05).collect(),
            low: close.iter().map(|c| c - 0.05).collect(),
            volume: vec![volume; close.len()],
            close,
        }
    }

    /// Every stage passes for this shape of data.
    async fn add_momentum_stock(client: &MockAlpacaClient, symbol: &str) {
        client.set_close(symbol, 20.0).await;
        client
            .set_bars(symbol, Timeframe::OneDay, series(vec![20.0; 8], 3_000_000.0))
            .await;
        let accelerating: Vec<f64> = (0..80).map(|i| 10.0 + (i * i) as f64 * 0.002).collect();
        client
            .set_bars(symbol, Timeframe::FiveMin, series(accelerating, 100_000.0))
            .await;
        let trending: Vec<f64> = (0..40).map(|i| 10.0 + i as f64 * 0.5).collect();
        client
            .set_bars(symbol, Timeframe::FifteenMin, series(trending, 100_000.0))
            .await;
        client.set_quote(symbol, Quote::new(20.00, 19.99)).await;
    }

    fn scanner(client: &MockAlpacaClient) -> StockScanner {
        StockScanner::new(
            Arc::new(client.clone()),
            &FilterConfig::default(),
            &ScannerConfig { refresh_secs: 1 },
        )
    }

    #[tokio::test]
    async fn test_potential_tickers_exclude_dotted_and_filter() {
        let client = MockAlpacaClient::default();
        client.set_universe(&["AAPL", "BRK.B", "PENNY", "THIN"]).await;
        add_momentum_stock(&client, "AAPL").await;
        add_momentum_stock(&client, "BRK.B").await;
        add_momentum_stock(&client, "THIN").await;
        client.set_close("PENNY", 2.0).await;
        client
            .set_bars("THIN", Timeframe::OneDay, series(vec![20.0; 8], 1_000.0))
            .await;

        let persistence = Arc::new(PersistenceManager::in_memory().unwrap());
        let scanner = scanner(&client).with_persistence(persistence.clone());

        let seed = scanner.get_potential_tickers().await.unwrap();

        assert_eq!(seed, symbols(&["AAPL"]));
        let stored = persistence.latest_seed_list().unwrap().unwrap();
        assert_eq!(stored.symbols, seed);
    }

    #[tokio::test]
    async fn test_find_suitable_tickers_applies_chain() {
        let client = MockAlpacaClient::default();
        add_momentum_stock(&client, "GOOD").await;
        add_momentum_stock(&client, "WIDE").await;
        client.set_quote("WIDE", Quote::new(100.0, 97.0)).await;
        add_momentum_stock(&client, "ONESIDED").await;
        client.set_quote("ONESIDED", Quote::new(0.0, 19.99)).await;

        let candidates = scanner(&client)
            .find_suitable_tickers(&symbols(&["WIDE", "GOOD", "ONESIDED"]))
            .await;

        assert_eq!(candidates, symbols(&["GOOD"]));
    }

    #[tokio::test]
    async fn test_pipeline_is_idempotent() {
        let client = MockAlpacaClient::default();
        for symbol in ["A", "B", "C"] {
            add_momentum_stock(&client, symbol).await;
        }
        client.set_quote("B", Quote::new(100.0, 97.0)).await;
        let scanner = scanner(&client);
        let seed = symbols(&["A", "B", "C"]);

        let first = scanner.find_suitable_tickers(&seed).await;
        let second = scanner.find_suitable_tickers(&seed).await;

        assert_eq!(first, second);
        assert_eq!(first, symbols(&["A", "C"]));
    }

    #[tokio::test]
    async fn test_run_publishes_and_stops() {
        let client = MockAlpacaClient::default();
        client.set_universe(&["AAPL"]).await;
        add_momentum_stock(&client, "AAPL").await;

        let persistence = Arc::new(PersistenceManager::in_memory().unwrap());
        let scanner = scanner(&client).with_persistence(persistence.clone());
        let (candidates_tx, mut candidates_rx) = watch::channel(Vec::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(scanner.run(candidates_tx, shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), candidates_rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*candidates_rx.borrow(), symbols(&["AAPL"]));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let stored = persistence.latest_candidate_set().unwrap().unwrap();
        assert_eq!(stored.symbols, symbols(&["AAPL"]));
    }
}
