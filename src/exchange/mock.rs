//! In-memory brokerage for tests and dry runs.

use super::traits::Brokerage;
use super::types::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated market and account state.
#[derive(Debug)]
pub struct MockMarketState {
    pub cash: Decimal,
    pub universe: Vec<String>,
    pub closes: HashMap<String, f64>,
    pub quotes: HashMap<String, Quote>,
    pub bars: HashMap<(String, Timeframe), BarSeries>,
    /// Orders accepted so far, oldest first
    pub orders: Vec<BracketOrderRequest>,
    /// Broker ids passed to `cancel_order`
    pub cancels: Vec<String>,
    /// Symbols whose requests fail
    pub failing_symbols: HashSet<String>,
    /// Symbols whose order submissions are rejected
    pub rejected_orders: HashSet<String>,
    pub has_next_page: bool,
}

impl Default for MockMarketState {
    fn default() -> Self {
        Self {
            cash: dec!(30000),
            universe: Vec::new(),
            closes: HashMap::new(),
            quotes: HashMap::new(),
            bars: HashMap::new(),
            orders: Vec::new(),
            cancels: Vec::new(),
            failing_symbols: HashSet::new(),
            rejected_orders: HashSet::new(),
            has_next_page: false,
        }
    }
}

/// Brokerage backed by [`MockMarketState`].
///
/// Cloning shares the underlying state, so a test can keep a handle and
/// inspect the orders a worker placed.
#[derive(Debug, Clone)]
pub struct MockAlpacaClient {
    state: Arc<RwLock<MockMarketState>>,
    order_id_counter: Arc<AtomicU64>,
}

impl Default for MockAlpacaClient {
    fn default() -> Self {
        Self::new(dec!(30000))
    }
}

impl MockAlpacaClient {
    /// Create an empty market with the given account cash.
    pub fn new(cash: Decimal) -> Self {
        info!("Mock brokerage initialized with cash: ${}", cash);
        let state = MockMarketState {
            cash,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn set_universe(&self, symbols: &[&str]) {
        self.state.write().await.universe = symbols.iter().map(|s| s.to_string()).collect();
    }

    pub async fn set_close(&self, symbol: &str, close: f64) {
        self.state
            .write()
            .await
            .closes
            .insert(symbol.to_string(), close);
    }

    pub async fn set_quote(&self, symbol: &str, quote: Quote) {
        self.state
            .write()
            .await
            .quotes
            .insert(symbol.to_string(), quote);
    }

    pub async fn set_bars(&self, symbol: &str, timeframe: Timeframe, bars: BarSeries) {
        self.state
            .write()
            .await
            .bars
            .insert((symbol.to_string(), timeframe), bars);
    }

    /// Make every data request that includes `symbol` fail.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_symbols
            .insert(symbol.to_string());
    }

    /// Reject order submissions for `symbol`.
    pub async fn reject_orders_for(&self, symbol: &str) {
        self.state
            .write()
            .await
            .rejected_orders
            .insert(symbol.to_string());
    }

    pub async fn set_has_next_page(&self, has_next_page: bool) {
        self.state.write().await.has_next_page = has_next_page;
    }

    /// Orders accepted so far.
    pub async fn orders(&self) -> Vec<BracketOrderRequest> {
        self.state.read().await.orders.clone()
    }

    /// Broker ids cancelled so far.
    pub async fn cancels(&self) -> Vec<String> {
        self.state.read().await.cancels.clone()
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn check_failures(state: &MockMarketState, symbols: &[String]) -> Result<()> {
        if let Some(symbol) = symbols.iter().find(|s| state.failing_symbols.contains(*s)) {
            bail!("Simulated data failure for {}", symbol);
        }
        Ok(())
    }

    fn batch<T: Clone>(
        symbols: &[String],
        has_next_page: bool,
        lookup: impl Fn(&str) -> Option<T>,
    ) -> BatchResponse<T> {
        let entries = symbols
            .iter()
            .map(|symbol| (symbol.clone(), lookup(symbol)))
            .collect();
        BatchResponse::new(entries, has_next_page)
    }
}

#[async_trait]
impl Brokerage for MockAlpacaClient {
    async fn get_account(&self) -> Result<Account> {
        let state = self.state.read().await;
        Ok(Account {
            id: "mock-account".to_string(),
            status: "ACTIVE".to_string(),
            cash: state.cash,
            buying_power: state.cash,
        })
    }

    async fn get_assets(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.universe.clone())
    }

    async fn get_historical_data(
        &self,
        symbols: &[String],
        request: BarRequest,
    ) -> Result<BatchResponse<BarSeries>> {
        let state = self.state.read().await;
        Self::check_failures(&state, symbols)?;
        debug!(
            count = symbols.len(),
            timeframe = %request.timeframe,
            "Mock historical data request"
        );
        Ok(Self::batch(symbols, state.has_next_page, |symbol| {
            state
                .bars
                .get(&(symbol.to_string(), request.timeframe))
                .cloned()
        }))
    }

    async fn get_latest_closing_price(&self, symbols: &[String]) -> Result<BatchResponse<f64>> {
        let state = self.state.read().await;
        Self::check_failures(&state, symbols)?;
        Ok(Self::batch(symbols, state.has_next_page, |symbol| {
            state.closes.get(symbol).copied()
        }))
    }

    async fn get_latest_quote(&self, symbols: &[String]) -> Result<BatchResponse<Quote>> {
        let state = self.state.read().await;
        Self::check_failures(&state, symbols)?;
        Ok(Self::batch(symbols, state.has_next_page, |symbol| {
            state.quotes.get(symbol).copied()
        }))
    }

    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<OrderResponse> {
        let mut state = self.state.write().await;
        if state.rejected_orders.contains(&order.symbol) {
            bail!("Order rejected: insufficient buying power for {}", order.symbol);
        }

        let id = self.next_order_id();
        info!(
            "[MOCK] Bracket {} {} x{} @ {} (tp {} / sl {})",
            order.side,
            order.symbol,
            order.qty,
            order.limit_price,
            order.take_profit.limit_price,
            order.stop_loss.stop_price
        );
        state.orders.push(order.clone());

        Ok(OrderResponse {
            id: id.clone(),
            client_order_id: id,
            symbol: order.symbol.clone(),
            status: "accepted".to_string(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        info!("[MOCK] Cancel order {}", order_id);
        self.state.write().await.cancels.push(order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_symbols_map_to_none() {
        let client = MockAlpacaClient::default();
        client.set_close("AAPL", 180.0).await;

        let batch = client
            .get_latest_closing_price(&symbols(&["AAPL", "ZZZZ"]))
            .await
            .unwrap();

        assert_eq!(batch.get("AAPL"), Some(&180.0));
        assert!(batch.entries.contains_key("ZZZZ"));
        assert_eq!(batch.get("ZZZZ"), None);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = MockAlpacaClient::default();
        client.fail_symbol("BAD").await;

        assert!(client
            .get_latest_quote(&symbols(&["AAPL", "BAD"]))
            .await
            .is_err());
        assert!(client.get_latest_quote(&symbols(&["AAPL"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_orders_and_cancels_are_recorded() {
        let client = MockAlpacaClient::default();
        let request =
            BracketOrderRequest::limit_buy("TSLA", dec!(2), dec!(12.40), dec!(12.90), dec!(11.90));

        let first = client.place_bracket_order(&request).await.unwrap();
        let second = client.place_bracket_order(&request).await.unwrap();
        assert_ne!(first.id, second.id);

        client.cancel_order(&first.id).await.unwrap();

        assert_eq!(client.orders().await.len(), 2);
        assert_eq!(client.cancels().await, vec![first.id]);
    }

    #[tokio::test]
    async fn test_rejected_order() {
        let client = MockAlpacaClient::default();
        client.reject_orders_for("TSLA").await;
        let request =
            BracketOrderRequest::limit_buy("TSLA", dec!(1), dec!(10), dec!(11), dec!(9));

        assert!(client.place_bracket_order(&request).await.is_err());
        assert!(client.orders().await.is_empty());
    }
}
