//! Momentum Trader - Main Entry Point
//!
//! Scans the equity universe for momentum candidates and trades them through
//! a bounded pool of bracket-order workers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use momentum_trader::config::Config;
use momentum_trader::exchange::{AlpacaClient, AlpacaTradeStream, Brokerage, StreamEvent};
use momentum_trader::persistence::PersistenceManager;
use momentum_trader::pool::Master;
use momentum_trader::strategy::StockScanner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const STREAM_QUEUE: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Momentum Trader CLI
#[derive(Parser)]
#[command(name = "momentum-trader")]
#[command(version, about = "Momentum equity scanner with bracket-order execution on Alpaca")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scanner, worker pool and trade stream until Ctrl-C (default)
    Run,

    /// Run one scan pass and print the candidate set without trading
    Scan,

    /// Show persisted seed list, candidate set and recent orders
    Status {
        /// Path to SQLite database (default: configured db_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Number of recent orders to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Scan) => run_scan(&config).await,
        Some(Commands::Status { db, limit }) => {
            show_status(db.as_deref().unwrap_or(&config.persistence.db_path), limit)
        }
        Some(Commands::Run) | None => run_trader(config).await,
    }
}

async fn run_trader(config: Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Momentum Trader v{}                          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    if config.alpaca.paper {
        info!("📝 PAPER TRADING MODE");
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
    }
    log_config(&config);

    let client: Arc<dyn Brokerage> = Arc::new(AlpacaClient::new(&config.alpaca)?);
    let persistence = Arc::new(
        PersistenceManager::new(&config.persistence.db_path)
            .context("Failed to initialize persistence database")?,
    );

    let master = Master::start(client.clone(), &config.pool, &config.execution)
        .await?
        .with_persistence(persistence.clone());
    let scanner = StockScanner::new(client, &config.filters, &config.scanner)
        .with_persistence(persistence);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (candidates_tx, candidates_rx) = watch::channel(Vec::new());
    let (events_tx, events_rx) = mpsc::channel(STREAM_QUEUE);

    let stream = AlpacaTradeStream::new(
        config.alpaca.stream_url(),
        config.alpaca.api_key.clone(),
        config.alpaca.secret_key.clone(),
    );
    let stream_task = tokio::spawn(relay_trade_stream(stream, events_tx, shutdown_rx.clone()));

    let scanner_shutdown = shutdown_rx.clone();
    let scanner_task = tokio::spawn(async move {
        if let Err(e) = scanner.run(candidates_tx, scanner_shutdown).await {
            error!("❌ [SCAN] Scanner stopped: {:#}", e);
        }
    });

    let master_task = tokio::spawn(master.run(candidates_rx, events_rx, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("🛑 Shutdown signal received");
    shutdown_tx.send(true).ok();

    let pool = master_task.await.context("Master task failed")?;
    scanner_task.await.ok();
    stream_task.await.ok();

    info!(
        "✅ Stopped with {} active ticker(s): {:?}",
        pool.active_len(),
        pool.active_tickers()
    );
    Ok(())
}

/// Keep a trade stream connected, forwarding its events to the master and
/// reconnecting after every disconnect until shutdown.
async fn relay_trade_stream(
    stream: AlpacaTradeStream,
    events: mpsc::Sender<StreamEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (tx, mut rx) = mpsc::channel(STREAM_QUEUE);
        match stream.subscribe_trade_updates(tx).await {
            Ok(()) => loop {
                tokio::select! {
                    event = rx.recv() => {
                        let event = event.unwrap_or(StreamEvent::Disconnected);
                        let disconnected = matches!(event, StreamEvent::Disconnected);
                        if events.send(event).await.is_err() {
                            return;
                        }
                        if disconnected {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            },
            Err(e) => {
                error!("Trade stream connect failed: {:#}", e);
                if events.send(StreamEvent::Disconnected).await.is_err() {
                    return;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_scan(config: &Config) -> Result<()> {
    let client: Arc<dyn Brokerage> = Arc::new(AlpacaClient::new(&config.alpaca)?);
    let scanner = StockScanner::new(client, &config.filters, &config.scanner);

    let seed = scanner.get_potential_tickers().await?;
    info!("📡 [SCAN] Seed list has {} tickers", seed.len());

    let candidates = scanner.find_suitable_tickers(&seed).await;

    println!("\n📊 Candidates ({})", candidates.len());
    for ticker in &candidates {
        println!("   ├─ {}", ticker);
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "momentum-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the life of the process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("momentum_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let f = &config.filters;
    info!("📋 Configuration:");
    info!("   Price Band: ${} - ${}", f.min_price, f.max_price);
    info!("   Min Daily Volume: {:.0}", f.min_daily_volume);
    info!("   Max Spread: {:.2}% of ask", f.max_spread_percent());
    info!(
        "   ADX({}) > {}, EMA({}), MACD {}/{}/{}",
        f.adx_period,
        f.adx_threshold,
        f.ema_period,
        f.macd_fast_period,
        f.macd_slow_period,
        f.macd_signal_period
    );
    info!("   Max Workers: {}", config.pool.max_workers);
    info!("   Allocation Ratio: {}", config.pool.allocation_ratio);
    info!("   Max ATR Multiplier: {}", config.execution.max_atr_multiplier);
    info!("   Cancel Delay: {}ms", config.execution.cancel_delay_ms);
    info!("   Scan Interval: {}s", config.scanner.refresh_secs);
}

fn show_status(db_path: &str, limit: usize) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              MOMENTUM TRADER STATUS                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The trader has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    println!("\n🌱 Seed List");
    match persistence.latest_seed_list()? {
        Some(seed) => {
            println!("   ├─ Tickers:  {}", seed.symbols.len());
            println!(
                "   └─ Built:    {}",
                seed.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("   └─ none recorded"),
    }

    println!("\n📊 Latest Candidate Set");
    match persistence.latest_candidate_set()? {
        Some(set) => {
            println!(
                "   ├─ Published: {}",
                set.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("   └─ Tickers:   {}", set.symbols.join(", "));
        }
        None => println!("   └─ none recorded"),
    }

    let orders = persistence.recent_orders(limit)?;
    println!("\n📈 Recent Orders ({})", orders.len());
    for order in &orders {
        println!(
            "   ┌─ {} x{} @ ${} [{}]",
            order.symbol, order.quantity, order.entry_limit_price, order.status
        );
        println!(
            "   ├─ TP ${} / SL ${}",
            order.take_profit_limit_price, order.stop_loss_stop_price
        );
        println!(
            "   └─ {} (updated {})",
            order.broker_order_id,
            order.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}
