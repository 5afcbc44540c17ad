//! Configuration management for the momentum trader.
//!
//! Loads settings from environment variables and config files.

use crate::exchange::Timeframe;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const MARKET_DATA_URL: &str = "https://data.alpaca.markets";
const PAPER_STREAM_URL: &str = "wss://paper-api.alpaca.markets/stream";
const LIVE_STREAM_URL: &str = "wss://api.alpaca.markets/stream";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Alpaca API credentials and endpoints
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    /// Thresholds, batch sizes and bar settings of every filter stage
    #[serde(default)]
    pub filters: FilterConfig,
    /// Scanner timing
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Worker pool sizing and capital allocation
    #[serde(default)]
    pub pool: PoolConfig,
    /// Bracket order sizing and cancellation
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// SQLite diagnostics store
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    /// API key id for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for authentication
    #[serde(default)]
    pub secret_key: String,
    /// Trade against the paper account instead of the live one
    #[serde(default = "default_paper")]
    pub paper: bool,
    /// Override for the trading REST endpoint
    #[serde(default)]
    pub trading_url: Option<String>,
    /// Override for the market data REST endpoint
    #[serde(default)]
    pub data_url: Option<String>,
    /// Override for the trade-update websocket endpoint
    #[serde(default)]
    pub stream_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    // Price
    /// Lowest last close we will trade (exclusive)
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    /// Highest last close we will trade (exclusive)
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    #[serde(default = "default_price_batch_size")]
    pub price_batch_size: usize,

    // Daily volume
    /// Minimum mean daily volume over the lookback, excluding today
    #[serde(default = "default_min_daily_volume")]
    pub min_daily_volume: f64,
    #[serde(default = "default_daily_volume_batch_size")]
    pub daily_volume_batch_size: usize,
    #[serde(default = "default_daily_volume_bar")]
    pub daily_volume_bar: Timeframe,
    #[serde(default = "default_daily_volume_lookback_hours")]
    pub daily_volume_lookback_hours: f64,

    // Recent volume
    #[serde(default = "default_recent_volume_batch_size")]
    pub recent_volume_batch_size: usize,
    #[serde(default = "default_recent_volume_bar")]
    pub recent_volume_bar: Timeframe,
    #[serde(default = "default_indicator_lookback_hours")]
    pub recent_volume_lookback_hours: f64,

    // Spread
    /// Maximum (ask - bid) / ask
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    #[serde(default = "default_spread_batch_size")]
    pub spread_batch_size: usize,

    // EMA
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_ema_batch_size")]
    pub ema_batch_size: usize,
    #[serde(default = "default_five_minute_bar")]
    pub ema_bar: Timeframe,
    #[serde(default = "default_indicator_lookback_hours")]
    pub ema_lookback_hours: f64,

    // ADX
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    /// Latest ADX must be strictly above this value
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,
    #[serde(default = "default_indicator_batch_size")]
    pub adx_batch_size: usize,
    #[serde(default = "default_recent_volume_bar")]
    pub adx_bar: Timeframe,
    #[serde(default = "default_indicator_lookback_hours")]
    pub adx_lookback_hours: f64,

    // MACD
    #[serde(default = "default_macd_fast")]
    pub macd_fast_period: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow_period: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal_period: usize,
    /// Number of trailing macd-line points used for the slope
    #[serde(default = "default_macd_relevant_bars")]
    pub macd_relevant_bars: usize,
    #[serde(default = "default_indicator_batch_size")]
    pub macd_batch_size: usize,
    #[serde(default = "default_five_minute_bar")]
    pub macd_bar: Timeframe,
    #[serde(default = "default_indicator_lookback_hours")]
    pub macd_lookback_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Seconds between two full filter passes
    #[serde(default = "default_scan_refresh_secs")]
    pub refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of workers alive at any time
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Share of account cash given to each ticker (0.0-1.0)
    #[serde(default = "default_allocation_ratio")]
    pub allocation_ratio: Decimal,
    /// Seconds between two assignment passes
    #[serde(default = "default_assign_interval_secs")]
    pub assign_interval_secs: u64,
    /// Seconds to wait for a new worker's ready handshake
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Free a worker when it reports a failed buy attempt
    #[serde(default = "default_release_on_error")]
    pub release_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound of the ATR coefficient used for the stop distance
    #[serde(default = "default_max_atr_multiplier")]
    pub max_atr_multiplier: f64,
    /// Milliseconds before an unfilled entry is cancelled
    #[serde(default = "default_cancel_delay_ms")]
    pub cancel_delay_ms: u64,
    /// ATR period for both horizons
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_five_minute_bar")]
    pub short_bar: Timeframe,
    #[serde(default = "default_short_lookback_hours")]
    pub short_lookback_hours: f64,
    #[serde(default = "default_long_bar")]
    pub long_bar: Timeframe,
    #[serde(default = "default_long_lookback_hours")]
    pub long_lookback_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_paper() -> bool {
    true
}

fn default_min_price() -> f64 {
    10.0
}

fn default_max_price() -> f64 {
    50.0
}

fn default_price_batch_size() -> usize {
    12_000
}

fn default_min_daily_volume() -> f64 {
    2_000_000.0
}

fn default_daily_volume_batch_size() -> usize {
    2_000
}

fn default_daily_volume_bar() -> Timeframe {
    Timeframe::OneDay
}

fn default_daily_volume_lookback_hours() -> f64 {
    168.0 // one week of daily bars
}

fn default_recent_volume_batch_size() -> usize {
    200
}

fn default_recent_volume_bar() -> Timeframe {
    Timeframe::FifteenMin
}

fn default_indicator_lookback_hours() -> f64 {
    10.0
}

fn default_max_spread() -> f64 {
    0.02
}

fn default_spread_batch_size() -> usize {
    150
}

fn default_ema_period() -> usize {
    20
}

fn default_ema_batch_size() -> usize {
    80
}

fn default_five_minute_bar() -> Timeframe {
    Timeframe::FiveMin
}

fn default_adx_period() -> usize {
    5
}

fn default_adx_threshold() -> f64 {
    20.0
}

fn default_indicator_batch_size() -> usize {
    40
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_macd_relevant_bars() -> usize {
    3
}

fn default_scan_refresh_secs() -> u64 {
    10
}

fn default_max_workers() -> usize {
    4
}

fn default_allocation_ratio() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_assign_interval_secs() -> u64 {
    10
}

fn default_ready_timeout_secs() -> u64 {
    10
}

fn default_release_on_error() -> bool {
    true
}

fn default_max_atr_multiplier() -> f64 {
    3.0
}

fn default_cancel_delay_ms() -> u64 {
    3_000
}

fn default_atr_period() -> usize {
    14
}

fn default_short_lookback_hours() -> f64 {
    1.5
}

fn default_long_bar() -> Timeframe {
    Timeframe::OneDay
}

fn default_long_lookback_hours() -> f64 {
    28.0 * 24.0
}

fn default_db_path() -> String {
    "data/momentum_trader.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MT"))
            .build()
            .context("Failed to build configuration")?;

        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Plain Alpaca variables win over an empty config entry
        if config.alpaca.api_key.is_empty() {
            config.alpaca.api_key = std::env::var("ALPACA_API_KEY").unwrap_or_default();
        }
        if config.alpaca.secret_key.is_empty() {
            config.alpaca.secret_key = std::env::var("ALPACA_SECRET_KEY").unwrap_or_default();
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let f = &self.filters;

        anyhow::ensure!(
            f.min_price >= 0.0 && f.min_price < f.max_price,
            "min_price must be non-negative and below max_price"
        );

        anyhow::ensure!(
            [
                f.price_batch_size,
                f.daily_volume_batch_size,
                f.recent_volume_batch_size,
                f.spread_batch_size,
                f.ema_batch_size,
                f.adx_batch_size,
                f.macd_batch_size,
            ]
            .iter()
            .all(|size| *size > 0),
            "every filter batch size must be greater than 0"
        );

        anyhow::ensure!(
            f.max_spread > 0.0 && f.max_spread < 1.0,
            "max_spread must be between 0 and 1"
        );

        anyhow::ensure!(
            f.macd_fast_period > 0 && f.macd_fast_period < f.macd_slow_period,
            "macd_fast_period must be positive and below macd_slow_period"
        );

        anyhow::ensure!(
            f.macd_relevant_bars >= 2,
            "macd_relevant_bars must be at least 2 to fit a slope"
        );

        anyhow::ensure!(
            self.pool.max_workers >= 1,
            "max_workers must be at least 1"
        );

        anyhow::ensure!(
            self.pool.allocation_ratio > Decimal::ZERO
                && self.pool.allocation_ratio <= Decimal::ONE,
            "allocation_ratio must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.max_atr_multiplier >= 1.0,
            "max_atr_multiplier must be >= 1"
        );

        anyhow::ensure!(
            self.execution.atr_period > 0,
            "atr_period must be greater than 0"
        );

        Ok(())
    }
}

impl AlpacaConfig {
    /// Trading REST endpoint, honoring the paper flag.
    pub fn trading_url(&self) -> String {
        self.trading_url.clone().unwrap_or_else(|| {
            if self.paper {
                PAPER_TRADING_URL.to_string()
            } else {
                LIVE_TRADING_URL.to_string()
            }
        })
    }

    /// Market data REST endpoint (shared by paper and live accounts).
    pub fn data_url(&self) -> String {
        self.data_url
            .clone()
            .unwrap_or_else(|| MARKET_DATA_URL.to_string())
    }

    /// Trade-update websocket endpoint, honoring the paper flag.
    pub fn stream_url(&self) -> String {
        self.stream_url.clone().unwrap_or_else(|| {
            if self.paper {
                PAPER_STREAM_URL.to_string()
            } else {
                LIVE_STREAM_URL.to_string()
            }
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alpaca: AlpacaConfig::default(),
            filters: FilterConfig::default(),
            scanner: ScannerConfig::default(),
            pool: PoolConfig::default(),
            execution: ExecutionConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            paper: default_paper(),
            trading_url: None,
            data_url: None,
            stream_url: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            price_batch_size: default_price_batch_size(),
            min_daily_volume: default_min_daily_volume(),
            daily_volume_batch_size: default_daily_volume_batch_size(),
            daily_volume_bar: default_daily_volume_bar(),
            daily_volume_lookback_hours: default_daily_volume_lookback_hours(),
            recent_volume_batch_size: default_recent_volume_batch_size(),
            recent_volume_bar: default_recent_volume_bar(),
            recent_volume_lookback_hours: default_indicator_lookback_hours(),
            max_spread: default_max_spread(),
            spread_batch_size: default_spread_batch_size(),
            ema_period: default_ema_period(),
            ema_batch_size: default_ema_batch_size(),
            ema_bar: default_five_minute_bar(),
            ema_lookback_hours: default_indicator_lookback_hours(),
            adx_period: default_adx_period(),
            adx_threshold: default_adx_threshold(),
            adx_batch_size: default_indicator_batch_size(),
            adx_bar: default_recent_volume_bar(),
            adx_lookback_hours: default_indicator_lookback_hours(),
            macd_fast_period: default_macd_fast(),
            macd_slow_period: default_macd_slow(),
            macd_signal_period: default_macd_signal(),
            macd_relevant_bars: default_macd_relevant_bars(),
            macd_batch_size: default_indicator_batch_size(),
            macd_bar: default_five_minute_bar(),
            macd_lookback_hours: default_indicator_lookback_hours(),
        }
    }
}

impl FilterConfig {
    /// Minimum volume of the latest 15-minute bar, derived from the daily minimum
    /// spread over 6.5 trading hours in quarter-hour slices.
    pub fn min_recent_volume(&self) -> f64 {
        self.min_daily_volume / 6.5 / 4.0
    }

    /// `max_spread` is a fraction of the ask; this is the same bound in percent.
    pub fn max_spread_percent(&self) -> f64 {
        self.max_spread * 100.0
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_scan_refresh_secs(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            allocation_ratio: default_allocation_ratio(),
            assign_interval_secs: default_assign_interval_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            release_on_error: default_release_on_error(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_atr_multiplier: default_max_atr_multiplier(),
            cancel_delay_ms: default_cancel_delay_ms(),
            atr_period: default_atr_period(),
            short_bar: default_five_minute_bar(),
            short_lookback_hours: default_short_lookback_hours(),
            long_bar: default_long_bar(),
            long_lookback_hours: default_long_lookback_hours(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
