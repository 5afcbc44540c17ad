//! Alpaca REST API client.

use crate::config::AlpacaConfig;
use crate::exchange::traits::Brokerage;
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Exchanges whose listings we scan.
const SCANNED_EXCHANGES: [&str; 4] = ["NYSE", "NASDAQ", "ARCA", "BATS"];

/// Largest page the bars endpoint will return.
const BARS_PAGE_LIMIT: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: HashMap<String, Vec<Bar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestBarsResponse {
    #[serde(default)]
    bars: HashMap<String, Bar>,
}

#[derive(Debug, Deserialize)]
struct LatestQuotesResponse {
    #[serde(default)]
    quotes: HashMap<String, Quote>,
}

/// Alpaca API client covering both trading and market data endpoints.
pub struct AlpacaClient {
    http: Client,
    api_key: String,
    secret_key: String,
    trading_base_url: String,
    data_base_url: String,
}

impl AlpacaClient {
    /// Create a new Alpaca client from configuration.
    pub fn new(config: &AlpacaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            trading_base_url: config.trading_url(),
            data_base_url: config.data_url(),
        })
    }

    /// Attach the key headers every Alpaca endpoint requires.
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Comma-joined, URL-encoded symbol list.
    fn symbols_param(symbols: &[String]) -> String {
        urlencoding::encode(&symbols.join(",")).into_owned()
    }

    /// Fail on non-2xx with the body attached, otherwise parse JSON.
    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alpaca {} error {}: {}", what, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    // ==================== Market Data ====================

    async fn fetch_bars(&self, symbols: &[String], request: BarRequest) -> Result<BarsResponse> {
        let start = request
            .start_time(Utc::now())
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = format!(
            "{}/v2/stocks/bars?symbols={}&timeframe={}&start={}&sort=asc&limit={}",
            self.data_base_url,
            Self::symbols_param(symbols),
            request.timeframe,
            urlencoding::encode(&start),
            BARS_PAGE_LIMIT
        );

        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch historical bars")?;

        Self::parse(response, "bars").await
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    #[instrument(skip(self))]
    async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.trading_base_url);
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch account")?;

        Self::parse(response, "account").await
    }

    #[instrument(skip(self))]
    async fn get_assets(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}/v2/assets?status=active&asset_class=us_equity",
            self.trading_base_url
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch assets")?;

        let assets: Vec<Asset> = Self::parse(response, "assets").await?;
        let total = assets.len();

        let symbols: Vec<String> = assets
            .into_iter()
            .filter(|a| {
                a.asset_class == "us_equity"
                    && a.tradable
                    && SCANNED_EXCHANGES.contains(&a.exchange.as_str())
            })
            .map(|a| a.symbol)
            .collect();

        info!(total, kept = symbols.len(), "Fetched asset universe");
        Ok(symbols)
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len(), timeframe = %request.timeframe))]
    async fn get_historical_data(
        &self,
        symbols: &[String],
        request: BarRequest,
    ) -> Result<BatchResponse<BarSeries>> {
        let data = self.fetch_bars(symbols, request).await?;

        let entries = symbols
            .iter()
            .map(|symbol| {
                let series = data
                    .bars
                    .get(symbol)
                    .filter(|bars| !bars.is_empty())
                    .map(|bars| BarSeries::from_bars(bars));
                (symbol.clone(), series)
            })
            .collect();

        Ok(BatchResponse::new(entries, data.next_page_token.is_some()))
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn get_latest_closing_price(&self, symbols: &[String]) -> Result<BatchResponse<f64>> {
        let url = format!(
            "{}/v2/stocks/bars/latest?symbols={}",
            self.data_base_url,
            Self::symbols_param(symbols)
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch latest bars")?;

        let data: LatestBarsResponse = Self::parse(response, "latest bars").await?;
        let entries = data
            .bars
            .into_iter()
            .map(|(symbol, bar)| (symbol, Some(bar.close)))
            .collect();

        Ok(BatchResponse::new(entries, false))
    }

    #[instrument(skip(self, symbols), fields(count = symbols.len()))]
    async fn get_latest_quote(&self, symbols: &[String]) -> Result<BatchResponse<Quote>> {
        let url = format!(
            "{}/v2/stocks/quotes/latest?symbols={}",
            self.data_base_url,
            Self::symbols_param(symbols)
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Failed to fetch latest quotes")?;

        let data: LatestQuotesResponse = Self::parse(response, "latest quotes").await?;
        let entries = data
            .quotes
            .into_iter()
            .map(|(symbol, quote)| (symbol, Some(quote)))
            .collect();

        Ok(BatchResponse::new(entries, false))
    }

    #[instrument(skip(self, order), fields(symbol = %order.symbol, qty = %order.qty))]
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> Result<OrderResponse> {
        let url = format!("{}/v2/orders", self.trading_base_url);

        debug!("Placing bracket order: {:?}", order);

        let response = self
            .authed(self.http.post(&url))
            .json(order)
            .send()
            .await
            .context("Failed to place bracket order")?;

        Self::parse(response, "order").await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.trading_base_url, order_id);
        let response = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .context("Failed to cancel order")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alpaca cancel error {}: {}", status, body);
        }

        Ok(())
    }
}
