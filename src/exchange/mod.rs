//! Brokerage integrations.
//!
//! ## Alpaca
//! REST client for account, assets, market data and bracket orders, plus the
//! `trade_updates` WebSocket stream the worker pool listens on.
//!
//! ## Mock
//! In-memory brokerage used by tests.

mod client;
pub mod mock;
mod traits;
mod types;
mod websocket;

pub use client::AlpacaClient;
pub use mock::MockAlpacaClient;
#[cfg(test)]
pub use traits::MockBrokerage;
pub use traits::Brokerage;
pub use types::*;
pub use websocket::{
    parse_stream_message, AlpacaTradeStream, StreamEvent, StreamMessage, StreamRequest,
    TradeEvent, TradeUpdate, TradeUpdateOrder,
};
