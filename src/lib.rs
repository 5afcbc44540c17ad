//! # Momentum Trader
//!
//! Scans US equities for short-term momentum and trades each candidate with a
//! volatility-sized bracket order on Alpaca.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Alpaca API client (REST + trade-update WebSocket) and mock
//! - `indicators`: EMA, ATR, ADX and MACD over bar series
//! - `strategy`: Filter stages and the stock scanner
//! - `pool`: Master / worker pool that executes bracket orders
//! - `persistence`: SQLite record of seed lists, candidate sets and orders
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod exchange;
pub mod indicators;
pub mod persistence;
pub mod pool;
pub mod strategy;
pub mod utils;

pub use config::Config;
