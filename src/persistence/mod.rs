//! SQLite persistence for scan results and order history.
//!
//! Records what the trader saw and did so a restart or the `status`
//! command can inspect it:
//! - Seed lists produced at startup
//! - Candidate sets published by each scan
//! - Bracket orders placed by workers and their lifecycle status

use crate::exchange::BracketOrder;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Lifecycle status of a recorded bracket order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Accepted by the broker, entry not yet filled
    Placed,
    /// Entry filled, exit legs working
    EntryFilled,
    /// Exit leg filled
    Closed,
    /// Entry canceled before filling
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::EntryFilled => "entry_filled",
            OrderStatus::Closed => "closed",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Canceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "placed" => Ok(OrderStatus::Placed),
            "entry_filled" => Ok(OrderStatus::EntryFilled),
            "closed" => Ok(OrderStatus::Closed),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(anyhow!("Unknown order status: {}", other)),
        }
    }
}

/// One persisted order row.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub broker_order_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_limit_price: Decimal,
    pub take_profit_limit_price: Decimal,
    pub stop_loss_stop_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored list of symbols with the time it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSnapshot {
    pub created_at: DateTime<Utc>,
    pub symbols: Vec<String>,
}

fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-based persistence manager.
///
/// The connection sits behind a mutex so the scanner and the worker pool can
/// share one manager through an `Arc`.
pub struct PersistenceManager {
    conn: Mutex<Connection>,
}

impl PersistenceManager {
    /// Open (or create) the database and initialize the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let manager = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        manager.init_schema()?;
        Ok(manager)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Persistence connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS seed_lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                symbol_count INTEGER NOT NULL,
                symbols TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS candidate_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                symbol_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS candidate_symbols (
                set_id INTEGER NOT NULL REFERENCES candidate_sets(id),
                ordinal INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                PRIMARY KEY (set_id, ordinal)
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                broker_order_id TEXT NOT NULL UNIQUE,
                symbol TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_limit_price TEXT NOT NULL,
                take_profit_limit_price TEXT NOT NULL,
                stop_loss_stop_price TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
            CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Record a seed list.
    pub fn record_seed_list(&self, symbols: &[String]) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO seed_lists (created_at, symbol_count, symbols) VALUES (?1, ?2, ?3)",
            params![
                Utc::now().to_rfc3339(),
                symbols.len(),
                serde_json::to_string(symbols)?,
            ],
        )?;
        debug!(count = symbols.len(), "Seed list recorded");
        Ok(())
    }

    /// Most recently recorded seed list.
    pub fn latest_seed_list(&self) -> Result<Option<SymbolSnapshot>> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row(
                "SELECT created_at, symbols FROM seed_lists ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(created_at, symbols)| -> Result<SymbolSnapshot> {
            Ok(SymbolSnapshot {
                created_at: parse_timestamp(&created_at),
                symbols: serde_json::from_str(&symbols)
                    .context("Corrupt seed list symbols column")?,
            })
        })
        .transpose()
    }

    /// Record a published candidate set, one row per symbol in rank order.
    pub fn record_candidate_set(&self, symbols: &[String]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO candidate_sets (created_at, symbol_count) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), symbols.len()],
        )?;
        let set_id = tx.last_insert_rowid();

        for (rank, symbol) in symbols.iter().enumerate() {
            tx.execute(
                "INSERT INTO candidate_symbols (set_id, ordinal, symbol) VALUES (?1, ?2, ?3)",
                params![set_id, rank, symbol],
            )?;
        }

        tx.commit()?;
        debug!(set_id, count = symbols.len(), "Candidate set recorded");
        Ok(())
    }

    /// Most recently recorded candidate set.
    pub fn latest_candidate_set(&self) -> Result<Option<SymbolSnapshot>> {
        let conn = self.conn()?;
        let latest: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, created_at FROM candidate_sets ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((set_id, created_at)) = latest else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT symbol FROM candidate_symbols WHERE set_id = ?1 ORDER BY ordinal")?;
        let symbols = stmt
            .query_map([set_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(SymbolSnapshot {
            created_at: parse_timestamp(&created_at),
            symbols,
        }))
    }

    /// Record a newly placed bracket order.
    pub fn record_order(&self, order: &BracketOrder) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            r#"
            INSERT INTO orders (broker_order_id, symbol, quantity, entry_limit_price,
                                take_profit_limit_price, stop_loss_stop_price, status,
                                created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                order.broker_order_id,
                order.symbol,
                order.quantity.to_string(),
                order.entry_limit_price.to_string(),
                order.take_profit_limit_price.to_string(),
                order.stop_loss_stop_price.to_string(),
                OrderStatus::Placed.as_str(),
                now,
            ],
        )?;
        Ok(())
    }

    /// Move the latest open order for `symbol` to `status`.
    ///
    /// Returns whether an order was updated.
    pub fn update_order_status(&self, symbol: &str, status: OrderStatus) -> Result<bool> {
        let updated = self.conn()?.execute(
            r#"
            UPDATE orders SET status = ?1, updated_at = ?2
            WHERE id = (
                SELECT id FROM orders
                WHERE symbol = ?3 AND status NOT IN ('closed', 'canceled')
                ORDER BY id DESC LIMIT 1
            )
            "#,
            params![status.as_str(), Utc::now().to_rfc3339(), symbol],
        )?;

        if updated == 0 {
            warn!(symbol, %status, "No open order to update");
        }
        Ok(updated > 0)
    }

    /// Most recent orders, newest first.
    pub fn recent_orders(&self, limit: usize) -> Result<Vec<OrderRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT broker_order_id, symbol, quantity, entry_limit_price,
                   take_profit_limit_price, stop_loss_stop_price, status,
                   created_at, updated_at
            FROM orders
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, symbol, qty, entry, tp, sl, status, created_at, updated_at)| -> Result<OrderRecord> {
                    Ok(OrderRecord {
                        broker_order_id: id,
                        symbol,
                        quantity: Decimal::from_str(&qty)?,
                        entry_limit_price: Decimal::from_str(&entry)?,
                        take_profit_limit_price: Decimal::from_str(&tp)?,
                        stop_loss_stop_price: Decimal::from_str(&sl)?,
                        status: status.parse()?,
                        created_at: parse_timestamp(&created_at),
                        updated_at: parse_timestamp(&updated_at),
                    })
                },
            )
            .collect()
    }
}
