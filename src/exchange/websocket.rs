//! Alpaca trade-update WebSocket client.
//!
//! Protocol: authenticate, wait for `authorization`, request the
//! `trade_updates` stream, then forward every order event to the pool.

use super::types::OrderSide;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const TRADE_UPDATES_STREAM: &str = "trade_updates";

/// Messages we send to the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StreamRequest {
    Auth { key: String, secret: String },
    Listen { data: ListenData },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenData {
    pub streams: Vec<String>,
}

/// Messages the stream sends us, keyed by their `stream` field.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "stream", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Authorization(AuthorizationData),
    Listening(ListenData),
    TradeUpdates(TradeUpdate),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuthorizationData {
    pub status: String,
    #[serde(default)]
    pub action: Option<String>,
}

impl AuthorizationData {
    pub fn is_authorized(&self) -> bool {
        self.status == "authorized"
    }
}

/// Order lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeEvent {
    New,
    Fill,
    PartialFill,
    Canceled,
    Expired,
    Rejected,
    Replaced,
    PendingNew,
    PendingCancel,
    DoneForDay,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TradeUpdateOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
}

/// One `trade_updates` payload.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TradeUpdate {
    pub event: TradeEvent,
    pub order: TradeUpdateOrder,
}

impl TradeUpdate {
    pub fn symbol(&self) -> &str {
        &self.order.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.order.side
    }
}

/// Events forwarded to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Authenticated and subscribed
    Connected,
    /// Order lifecycle update
    TradeUpdate(TradeUpdate),
    /// Connection lost
    Disconnected,
}

/// Parse one frame payload into a stream message, ignoring unknown streams.
pub fn parse_stream_message(payload: &[u8]) -> Option<StreamMessage> {
    match serde_json::from_slice::<StreamMessage>(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(error = %e, "Ignoring unrecognized stream payload");
            None
        }
    }
}

/// Alpaca trade-update stream client.
pub struct AlpacaTradeStream {
    url: String,
    api_key: String,
    secret_key: String,
}

impl AlpacaTradeStream {
    /// Create a new stream client.
    pub fn new(url: String, api_key: String, secret_key: String) -> Self {
        Self {
            url,
            api_key,
            secret_key,
        }
    }

    /// Connect, authenticate and forward trade updates into `tx` from a
    /// background task. Returns once the socket is open and the auth request
    /// has been sent.
    pub async fn subscribe_trade_updates(&self, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
        info!("Connecting to trade stream: {}", self.url);

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .context("Failed to connect to trade stream")?;

        let (mut write, mut read) = ws_stream.split();

        let auth = StreamRequest::Auth {
            key: self.api_key.clone(),
            secret: self.secret_key.clone(),
        };
        write
            .send(Message::text(serde_json::to_string(&auth)?))
            .await
            .context("Failed to send stream auth")?;

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let payload = match msg {
                    Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                    // Paper endpoints deliver JSON in binary frames
                    Ok(Message::Binary(bytes)) => bytes.to_vec(),
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        info!("Trade stream closed by server");
                        let _ = tx.send(StreamEvent::Disconnected).await;
                        return;
                    }
                    Err(e) => {
                        error!("Trade stream error: {}", e);
                        let _ = tx.send(StreamEvent::Disconnected).await;
                        return;
                    }
                    _ => continue,
                };

                match parse_stream_message(&payload) {
                    Some(StreamMessage::Authorization(auth)) if auth.is_authorized() => {
                        info!("Authenticated on trade stream");
                        let listen = StreamRequest::Listen {
                            data: ListenData {
                                streams: vec![TRADE_UPDATES_STREAM.to_string()],
                            },
                        };
                        let sent = match serde_json::to_string(&listen) {
                            Ok(body) => write.send(Message::text(body)).await.is_ok(),
                            Err(_) => false,
                        };
                        if !sent {
                            error!("Failed to subscribe to trade updates");
                            let _ = tx.send(StreamEvent::Disconnected).await;
                            return;
                        }
                    }
                    Some(StreamMessage::Authorization(auth)) => {
                        error!(status = %auth.status, "Trade stream authorization rejected");
                        let _ = tx.send(StreamEvent::Disconnected).await;
                        return;
                    }
                    Some(StreamMessage::Listening(data)) => {
                        info!(streams = ?data.streams, "Listening on trade stream");
                        if tx.send(StreamEvent::Connected).await.is_err() {
                            warn!("Stream event receiver dropped");
                            return;
                        }
                    }
                    Some(StreamMessage::TradeUpdates(update)) => {
                        debug!(
                            symbol = %update.order.symbol,
                            side = %update.order.side,
                            event = ?update.event,
                            "Trade update"
                        );
                        if tx.send(StreamEvent::TradeUpdate(update)).await.is_err() {
                            warn!("Stream event receiver dropped");
                            return;
                        }
                    }
                    None => {}
                }
            }

            let _ = tx.send(StreamEvent::Disconnected).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_request_shape() {
        let auth = StreamRequest::Auth {
            key: "k".to_string(),
            secret: "s".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["action"], "auth");
        assert_eq!(json["key"], "k");
        assert_eq!(json["secret"], "s");
    }

    #[test]
    fn test_listen_request_shape() {
        let listen = StreamRequest::Listen {
            data: ListenData {
                streams: vec!["trade_updates".to_string()],
            },
        };
        let json: serde_json::Value = serde_json::to_value(&listen).unwrap();
        assert_eq!(json["action"], "listen");
        assert_eq!(json["data"]["streams"][0], "trade_updates");
    }

    #[test]
    fn test_parse_authorization() {
        let message = parse_stream_message(
            br#"{"stream":"authorization","data":{"action":"authenticate","status":"authorized"}}"#,
        )
        .unwrap();

        match message {
            StreamMessage::Authorization(auth) => assert!(auth.is_authorized()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_sell_fill_trade_update() {
        let message = parse_stream_message(
            br#"{
                "stream": "trade_updates",
                "data": {
                    "event": "fill",
                    "price": "12.9",
                    "order": {"id": "o-1", "symbol": "TSLA", "side": "sell", "qty": "2"}
                }
            }"#,
        )
        .unwrap();

        let StreamMessage::TradeUpdates(update) = message else {
            panic!("expected trade update");
        };
        assert_eq!(update.event, TradeEvent::Fill);
        assert_eq!(update.side(), OrderSide::Sell);
        assert_eq!(update.symbol(), "TSLA");
    }

    #[test]
    fn test_unknown_event_maps_to_other() {
        let message = parse_stream_message(
            br#"{"stream":"trade_updates","data":{"event":"calculated","order":{"id":"o","symbol":"A","side":"buy"}}}"#,
        )
        .unwrap();

        let StreamMessage::TradeUpdates(update) = message else {
            panic!("expected trade update");
        };
        assert_eq!(update.event, TradeEvent::Other);
    }

    #[test]
    fn test_unknown_stream_is_ignored() {
        assert!(parse_stream_message(br#"{"stream":"bars","data":{}}"#).is_none());
        assert!(parse_stream_message(b"not json").is_none());
    }
}
