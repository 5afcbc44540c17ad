//! Brokerage-agnostic trait consumed by the scanner and the workers.
//!
//! Everything the trading core needs from the outside world goes through
//! [`Brokerage`]:
//! - Account snapshot and tradable universe
//! - Historical bars, latest closes and quotes (batched by symbol)
//! - Bracket order placement and cancellation

use super::types::{
    Account, BarRequest, BarSeries, BatchResponse, BracketOrderRequest, OrderResponse, Quote,
};
use async_trait::async_trait;

/// Market data and order routing for one brokerage account.
///
/// Batched methods return one entry per requested symbol the venue knows about;
/// symbols with no data map to `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Brokerage: Send + Sync {
    /// Current account snapshot (cash, buying power).
    async fn get_account(&self) -> anyhow::Result<Account>;

    /// Symbols of all active, tradable common-equity assets.
    async fn get_assets(&self) -> anyhow::Result<Vec<String>>;

    /// Historical bars for every symbol in `symbols`.
    async fn get_historical_data(
        &self,
        symbols: &[String],
        request: BarRequest,
    ) -> anyhow::Result<BatchResponse<BarSeries>>;

    /// Close of the most recent bar for every symbol in `symbols`.
    async fn get_latest_closing_price(
        &self,
        symbols: &[String],
    ) -> anyhow::Result<BatchResponse<f64>>;

    /// Latest quote for every symbol in `symbols`.
    async fn get_latest_quote(&self, symbols: &[String]) -> anyhow::Result<BatchResponse<Quote>>;

    /// Submit a bracket order and return the broker acknowledgement.
    async fn place_bracket_order(
        &self,
        order: &BracketOrderRequest,
    ) -> anyhow::Result<OrderResponse>;

    /// Cancel an open order by broker id.
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()>;
}
