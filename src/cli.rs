use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    advisory::{DEFAULT_MODEL, GeminiAdvisor},
    api::router,
    engine::MatchingEngine,
    events::Level,
    feed::{BinanceFeed, SimulatedFeed},
    instrument::{BTC_USDT, Pair},
    orders::{NewOrder, OrderType, Side},
    runner::run_feed,
    state::{AppState, EngineConfig},
    tick::Tick,
    window::DEFAULT_WINDOW,
};

/// Paper-trading simulator: live prices, simulated orders
#[derive(Parser)]
#[command(name = "paper-trader")]
#[command(version, about = "Match simulated orders against a live crypto price feed")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FeedKind {
    /// Binance aggTrade websocket
    Binance,
    /// Local random walk
    Simulated,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine behind the HTTP/WebSocket API
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        /// BTCUSDT or ETHUSDT
        #[arg(long, default_value = "BTCUSDT")]
        symbol: Pair,

        /// Ticks kept in the market window
        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: usize,

        /// Simulated order acceptance latency
        #[arg(long, default_value_t = 300)]
        latency_ms: u64,

        #[arg(long, value_enum, default_value_t = FeedKind::Binance)]
        feed: FeedKind,

        /// Override the Binance websocket base URL
        #[arg(long)]
        feed_url: Option<String>,

        /// Wait before reconnecting a dropped feed
        #[arg(long, default_value_t = 2_000)]
        reconnect_ms: u64,

        /// Starting price of the simulated feed
        #[arg(long, default_value_t = 60_000.0)]
        sim_start: f64,

        /// Step deviation of the simulated feed
        #[arg(long, default_value_t = 15.0)]
        sim_sigma: f64,

        #[arg(long, default_value_t = 500)]
        sim_interval_ms: u64,

        /// Gemini API key; advisory endpoints are disabled without it
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        gemini_key: Option<String>,

        #[arg(long, default_value = DEFAULT_MODEL)]
        gemini_model: String,

        /// Upper bound on one advisory call
        #[arg(long, default_value_t = 20)]
        advisory_timeout_secs: u64,
    },

    /// Run a list of prices through the engine offline and print the event log
    Replay {
        /// Tick prices, oldest first
        #[arg(required = true, num_args = 1..)]
        prices: Vec<Decimal>,

        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: usize,

        /// Orders placed before the first tick, as SIDE:TYPE:QTY[:LIMIT[:STOP]]
        /// e.g. buy:limit:1:99
        #[arg(long = "order", value_parser = parse_order)]
        orders: Vec<NewOrder>,
    },
}

fn parse_side(s: &str) -> Result<Side, String> {
    match s.to_ascii_lowercase().as_str() {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(format!("unknown side `{}`", other)),
    }
}

fn parse_type(s: &str) -> Result<OrderType, String> {
    match s.to_ascii_lowercase().as_str() {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        "stop_limit" | "stop-limit" | "stoplimit" => Ok(OrderType::StopLimit),
        other => Err(format!("unknown order type `{}`", other)),
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, String> {
    s.parse().map_err(|_| format!("not a number: `{}`", s))
}

/// Parses `SIDE:TYPE:QTY[:LIMIT[:STOP]]`.
fn parse_order(s: &str) -> Result<NewOrder, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if !(3..=5).contains(&parts.len()) {
        return Err(format!("expected SIDE:TYPE:QTY[:LIMIT[:STOP]], got `{}`", s));
    }
    Ok(NewOrder {
        side: parse_side(parts[0])?,
        order_type: parse_type(parts[1])?,
        quantity: parse_decimal(parts[2])?,
        limit_price: parts.get(3).map(|p| parse_decimal(p)).transpose()?,
        stop_price: parts.get(4).map(|p| parse_decimal(p)).transpose()?,
    })
}

/// Cancels the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("shutdown requested");
        tc.cancel();
    });
    token
}

async fn serve(
    addr: SocketAddr,
    config: EngineConfig,
    feed: FeedKind,
    feed_url: Option<String>,
    reconnect: Duration,
    sim: (f64, f64, Duration),
    gemini: Option<(String, String)>,
) -> anyhow::Result<()> {
    let shutdown = shutdown_token();
    let mut state = AppState::new(config).with_shutdown(shutdown.clone());
    if let Some((key, model)) = gemini {
        state = state.with_advisor(Arc::new(GeminiAdvisor::new(key, model)));
    } else {
        info!("GEMINI_API_KEY not set, advisory endpoints disabled");
    }
    let pair = state.config.pair;

    let feed_task = match feed {
        FeedKind::Binance => {
            let adapter = match feed_url {
                Some(base) => BinanceFeed::with_base(&base, pair),
                None => BinanceFeed::new(pair),
            };
            tokio::spawn(run_feed(state.clone(), adapter, reconnect, shutdown.clone()))
        }
        FeedKind::Simulated => {
            let (start, sigma, interval) = sim;
            let adapter = SimulatedFeed::new(start, sigma, interval);
            tokio::spawn(run_feed(state.clone(), adapter, reconnect, shutdown.clone()))
        }
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("paper trader for {} listening on {}", pair, listener.local_addr()?);

    let app = router(state);
    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .context("http server")?;

    shutdown.cancel();
    feed_task.await.context("feed task")?;
    Ok(())
}

/// Places `orders`, then feeds `prices` through a fresh engine.
///
/// Non-positive prices are dropped with a WARN event, like malformed feed
/// frames.
pub fn replay_engine(prices: Vec<Decimal>, window: usize, orders: Vec<NewOrder>) -> MatchingEngine {
    let mut engine = MatchingEngine::new(BTC_USDT, window);
    for req in orders {
        // rejections are recorded in the event log
        let _ = engine.place(req);
    }
    for p in prices {
        match Tick::now(p) {
            Ok(tick) => {
                engine.on_tick(tick);
            }
            Err(e) => {
                engine.log(Level::Warn, format!("Dropping malformed tick: {}", e));
            }
        }
    }
    engine
}

/// Offline run: place `orders`, feed `prices`, print everything that happened.
pub fn replay(prices: Vec<Decimal>, window: usize, orders: Vec<NewOrder>) -> anyhow::Result<()> {
    let engine = replay_engine(prices, window, orders);

    for ev in engine.events().all() {
        println!("#{:<4} [{}] {}", ev.id, ev.level, ev.message);
    }
    println!("------ Orders ------");
    for o in engine.book().list_all() {
        let fill = o
            .fill_price
            .map(|p| format!(" @ {}", p))
            .unwrap_or_default();
        println!(
            "{} {} {} {} ({}) {}{}",
            o.id, o.side, o.quantity, o.pair, o.order_type, o.status, fill
        );
    }
    println!("------ Window ------");
    let prices: Vec<String> = engine.window().prices().iter().map(|p| p.to_string()).collect();
    println!("[{}]", prices.join(", "));
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            addr,
            symbol,
            window,
            latency_ms,
            feed,
            feed_url,
            reconnect_ms,
            sim_start,
            sim_sigma,
            sim_interval_ms,
            gemini_key,
            gemini_model,
            advisory_timeout_secs,
        } => {
            let config = EngineConfig {
                pair: symbol,
                window_size: window,
                accept_latency: Duration::from_millis(latency_ms),
                advisory_timeout: Duration::from_secs(advisory_timeout_secs),
            };
            serve(
                addr,
                config,
                feed,
                feed_url,
                Duration::from_millis(reconnect_ms),
                (sim_start, sim_sigma, Duration::from_millis(sim_interval_ms)),
                gemini_key.map(|k| (k, gemini_model)),
            )
            .await
        }
        Commands::Replay {
            prices,
            window,
            orders,
        } => replay(prices, window, orders),
    }
}
