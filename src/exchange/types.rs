//! Type definitions for Alpaca API requests and responses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Bar aggregation period, serialized the way the data API expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1Min")]
    OneMin,
    #[serde(rename = "5Min")]
    FiveMin,
    #[serde(rename = "15Min")]
    FifteenMin,
    #[serde(rename = "1Hour")]
    OneHour,
    #[serde(rename = "1Day")]
    OneDay,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1Min",
            Timeframe::FiveMin => "5Min",
            Timeframe::FifteenMin => "15Min",
            Timeframe::OneHour => "1Hour",
            Timeframe::OneDay => "1Day",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a historical bars request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarRequest {
    pub timeframe: Timeframe,
    /// How far back from now the first bar may start
    pub lookback_hours: f64,
}

impl BarRequest {
    pub fn new(timeframe: Timeframe, lookback_hours: f64) -> Self {
        Self {
            timeframe,
            lookback_hours,
        }
    }

    /// RFC 3339 start timestamp for this request.
    pub fn start_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let millis = (self.lookback_hours * 3_600_000.0) as i64;
        now - chrono::Duration::milliseconds(millis)
    }
}

/// Response of a multi-symbol request.
///
/// Symbols the API returned nothing for are present with `None` so callers can
/// tell "no data" from "not requested".
#[derive(Debug, Clone)]
pub struct BatchResponse<T> {
    pub entries: HashMap<String, Option<T>>,
    /// The API signalled more pages than the one returned
    pub has_next_page: bool,
}

impl<T> BatchResponse<T> {
    pub fn new(entries: HashMap<String, Option<T>>, has_next_page: bool) -> Self {
        Self {
            entries,
            has_next_page,
        }
    }

    /// Entry for `symbol`, flattening "absent" and "null".
    pub fn get(&self, symbol: &str) -> Option<&T> {
        self.entries.get(symbol).and_then(|entry| entry.as_ref())
    }

    /// Convert every present entry, keeping the pagination flag.
    pub fn map<U>(self, f: impl Fn(T) -> U) -> BatchResponse<U> {
        BatchResponse {
            entries: self
                .entries
                .into_iter()
                .map(|(symbol, entry)| (symbol, entry.map(&f)))
                .collect(),
            has_next_page: self.has_next_page,
        }
    }
}

impl<T> Default for BatchResponse<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            has_next_page: false,
        }
    }
}

/// Account snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub buying_power: Decimal,
}

/// Tradable asset listing entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub symbol: String,
    #[serde(rename = "class")]
    pub asset_class: String,
    pub exchange: String,
    pub status: String,
    #[serde(default)]
    pub tradable: bool,
}

/// One OHLCV bar as returned by the data API.
#[derive(Debug, Clone, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
}

/// Column-oriented bars for one symbol, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl BarSeries {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut series = BarSeries {
            high: Vec::with_capacity(bars.len()),
            low: Vec::with_capacity(bars.len()),
            close: Vec::with_capacity(bars.len()),
            volume: Vec::with_capacity(bars.len()),
        };
        for bar in bars {
            series.high.push(bar.high);
            series.low.push(bar.low);
            series.close.push(bar.close);
            series.volume.push(bar.volume);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn latest_close(&self) -> Option<f64> {
        self.close.last().copied()
    }
}

/// Latest NBBO quote.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Quote {
    #[serde(rename = "ap")]
    pub ask_price: f64,
    #[serde(rename = "as", default)]
    pub ask_size: f64,
    #[serde(rename = "bp")]
    pub bid_price: f64,
    #[serde(rename = "bs", default)]
    pub bid_size: f64,
}

impl Quote {
    pub fn new(ask_price: f64, bid_price: f64) -> Self {
        Self {
            ask_price,
            ask_size: 0.0,
            bid_price,
            bid_size: 0.0,
        }
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Order class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    Simple,
    Bracket,
    Oco,
    Oto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeProfitLeg {
    pub limit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopLossLeg {
    pub stop_price: Decimal,
}

/// New bracket order request: a limit entry with take-profit and stop-loss legs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketOrderRequest {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(with = "rust_decimal::serde::str")]
    pub limit_price: Decimal,
    pub extended_hours: bool,
    pub order_class: OrderClass,
    pub take_profit: TakeProfitLeg,
    pub stop_loss: StopLossLeg,
}

impl BracketOrderRequest {
    /// Day limit buy with both exit legs attached.
    pub fn limit_buy(
        symbol: &str,
        qty: Decimal,
        limit_price: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Day,
            limit_price,
            extended_hours: false,
            order_class: OrderClass::Bracket,
            take_profit: TakeProfitLeg {
                limit_price: take_profit,
            },
            stop_loss: StopLossLeg {
                stop_price: stop_loss,
            },
        }
    }
}

/// Order acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
}

/// A bracket order as tracked by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrder {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_limit_price: Decimal,
    pub take_profit_limit_price: Decimal,
    pub stop_loss_stop_price: Decimal,
    pub broker_order_id: String,
    /// When the watchdog cancels the entry if it is still open
    pub cancel_deadline: DateTime<Utc>,
}
