//! Price feed adapters.
//!
//! The engine only depends on the [`FeedAdapter`] contract: connect, push
//! validated [`Tick`]s into an `mpsc` channel until the source ends, then
//! disconnect. The adapter is owned by whoever drives the engine; there is
//! no process-wide socket.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand_distr::{Distribution, Normal};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Deserialize;
use tokio::{net::TcpStream, sync::mpsc, time::sleep};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMsg,
};
use tracing::{debug, info, warn};

use crate::{errors::FeedError, instrument::Pair, tick::Tick};

pub const BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com/ws";

#[async_trait]
pub trait FeedAdapter: Send {
    /// Short label used in logs and events.
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Streams ticks into `tx` until the source ends or the receiver is
    /// dropped. Returns `Ok(())` when the receiver went away.
    async fn run(&mut self, tx: mpsc::Sender<Tick>) -> Result<(), FeedError>;

    async fn disconnect(&mut self) -> Result<(), FeedError>;
}

/// Binance aggregated-trade frame. Only the fields the engine needs.
#[derive(Debug, Deserialize)]
struct AggTrade {
    /// Price, as a decimal string
    #[serde(rename = "p")]
    price: String,
    /// Trade time in ms
    #[serde(rename = "T")]
    trade_time: Option<u64>,
}

/// Turns one `aggTrade` text frame into a tick.
pub fn parse_agg_trade(text: &str) -> Result<Tick, FeedError> {
    let frame: AggTrade =
        serde_json::from_str(text).map_err(|e| FeedError::Malformed(e.to_string()))?;
    let price: Decimal = frame
        .price
        .parse()
        .map_err(|_| FeedError::Malformed(format!("bad price `{}`", frame.price)))?;
    let tick = match frame.trade_time {
        Some(ms) => Tick::at_millis(ms, price),
        None => Tick::now(price),
    };
    tick.map_err(|e| FeedError::Malformed(e.to_string()))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live trades from the Binance `<symbol>@aggTrade` stream.
pub struct BinanceFeed {
    url: String,
    ws: Option<WsStream>,
}

impl BinanceFeed {
    pub fn new(pair: Pair) -> Self {
        Self::with_base(BINANCE_FUTURES_WS, pair)
    }

    pub fn with_base(base: &str, pair: Pair) -> Self {
        Self {
            url: format!("{}/{}@aggTrade", base.trim_end_matches('/'), pair.stream_name()),
            ws: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedAdapter for BinanceFeed {
    fn name(&self) -> &str {
        "binance"
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        info!("connecting to {}", self.url);
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        self.ws = Some(ws);
        Ok(())
    }

    async fn run(&mut self, tx: mpsc::Sender<Tick>) -> Result<(), FeedError> {
        let ws = self.ws.as_mut().ok_or(FeedError::Closed)?;
        while let Some(msg) = ws.next().await {
            match msg? {
                WsMsg::Text(txt) => match parse_agg_trade(&txt) {
                    Ok(tick) => {
                        if tx.send(tick).await.is_err() {
                            debug!("tick receiver dropped");
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("dropping frame: {}", e),
                },
                WsMsg::Ping(data) => ws.send(WsMsg::Pong(data)).await?,
                WsMsg::Close(_) => {
                    info!("feed closed by server");
                    break;
                }
                _ => {}
            }
        }
        self.ws = None;
        Err(FeedError::Closed)
    }

    async fn disconnect(&mut self) -> Result<(), FeedError> {
        if let Some(mut ws) = self.ws.take() {
            ws.close(None).await?;
        }
        Ok(())
    }
}

/// Offline feed: a Gaussian random walk around a starting price.
///
/// Each step draws `N(0, sigma)` and adds it to the mid price, flooring at
/// one cent so ticks stay positive.
pub struct SimulatedFeed {
    mid: f64,
    sigma: f64,
    interval: Duration,
    limit: Option<usize>,
}

impl SimulatedFeed {
    pub fn new(start: f64, sigma: f64, interval: Duration) -> Self {
        Self {
            mid: start,
            sigma,
            interval,
            limit: None,
        }
    }

    /// Stop after `n` ticks.
    pub fn take(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

#[async_trait]
impl FeedAdapter for SimulatedFeed {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        if !self.mid.is_finite() || self.mid <= 0.0 {
            return Err(FeedError::Connect(format!("bad start price {}", self.mid)));
        }
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(FeedError::Connect(format!("bad sigma {}", self.sigma)));
        }
        Ok(())
    }

    async fn run(&mut self, tx: mpsc::Sender<Tick>) -> Result<(), FeedError> {
        let drift = Normal::new(0.0, self.sigma)
            .map_err(|e| FeedError::Connect(format!("bad sigma {}: {}", self.sigma, e)))?;
        let mut sent = 0usize;
        loop {
            if self.limit.is_some_and(|n| sent >= n) {
                return Ok(());
            }
            // the rng is not Send, keep it out of the await below
            let step = drift.sample(&mut rand::rng());
            self.mid = (self.mid + step).max(0.01);
            let price = Decimal::from_f64(self.mid)
                .map(|p| p.round_dp(2))
                .ok_or_else(|| FeedError::Malformed(format!("price {}", self.mid)))?;
            let tick = Tick::now(price).map_err(|e| FeedError::Malformed(e.to_string()))?;
            if tx.send(tick).await.is_err() {
                return Ok(());
            }
            sent += 1;
            sleep(self.interval).await;
        }
    }

    async fn disconnect(&mut self) -> Result<(), FeedError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{BTC_USDT, ETH_USDT};
    use rust_decimal_macros::dec;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn parses_agg_trade_frame() {
        let txt = r#"{"e":"aggTrade","E":1700000000123,"s":"BTCUSDT","a":1,"p":"67012.50","q":"0.010","T":1700000000100,"m":false}"#;
        let tick = parse_agg_trade(txt).unwrap();
        assert_eq!(tick.price(), dec!(67012.50));
        assert_eq!(
            tick.time().duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_millis(1_700_000_000_100)
        );
    }

    #[test]
    fn drops_malformed_frames() {
        for txt in [
            "not json",
            r#"{"result":null,"id":1}"#,
            r#"{"p":"abc"}"#,
            r#"{"p":"0"}"#,
            r#"{"p":"-3.2"}"#,
        ] {
            assert!(
                matches!(parse_agg_trade(txt), Err(FeedError::Malformed(_))),
                "{} should be rejected",
                txt
            );
        }
    }

    #[test]
    fn binance_stream_url() {
        assert_eq!(
            BinanceFeed::new(BTC_USDT).url(),
            "wss://fstream.binance.com/ws/btcusdt@aggTrade"
        );
        assert_eq!(
            BinanceFeed::with_base("ws://localhost:9000/ws/", ETH_USDT).url(),
            "ws://localhost:9000/ws/ethusdt@aggTrade"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_feed_emits_positive_ticks() {
        let mut feed = SimulatedFeed::new(100.0, 5.0, Duration::from_millis(10)).take(20);
        feed.connect().await.unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        feed.run(tx).await.unwrap();
        let mut n = 0;
        while let Ok(t) = rx.try_recv() {
            assert!(t.price() > Decimal::ZERO);
            n += 1;
        }
        assert_eq!(n, 20);
    }

    #[tokio::test]
    async fn simulated_feed_rejects_bad_start() {
        let mut feed = SimulatedFeed::new(-1.0, 1.0, Duration::from_millis(1));
        assert!(feed.connect().await.is_err());
    }

    #[tokio::test]
    async fn simulated_feed_rejects_bad_sigma_on_connect() {
        for sigma in [-1.0, f64::NAN, f64::INFINITY] {
            let mut feed = SimulatedFeed::new(100.0, sigma, Duration::from_millis(1));
            assert!(
                matches!(feed.connect().await, Err(FeedError::Connect(_))),
                "sigma {} should be rejected",
                sigma
            );
        }
    }
}
