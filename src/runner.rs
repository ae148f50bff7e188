use std::time::Duration;

use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    errors::{FeedError, TradingError},
    events::Level,
    feed::FeedAdapter,
    state::AppState,
    tick::Tick,
};

const TICK_QUEUE: usize = 1024;

/// Applies one tick to the shared engine under its lock.
pub fn ingest(state: &AppState, tick: Tick) -> usize {
    state.engine().on_tick(tick).len()
}

/// Consumes ticks one at a time, in arrival order, until the channel closes
/// or `cancel` fires.
pub async fn run_engine(state: AppState, mut rx: mpsc::Receiver<Tick>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(tick) => {
                    let filled = ingest(&state, tick);
                    if filled > 0 {
                        debug!(filled, "fills on tick");
                    }
                }
                None => break,
            },
        }
    }
    info!("engine loop stopped");
}

/// One connect-and-stream attempt.
async fn session<F: FeedAdapter>(
    state: &AppState,
    feed: &mut F,
    tx: mpsc::Sender<Tick>,
) -> Result<(), FeedError> {
    feed.connect().await?;
    state.engine().log(
        Level::Info,
        format!("Connected to {} stream for {}", feed.name(), state.config.pair),
    );
    feed.run(tx).await
}

/// Keeps `feed` connected and pumps its ticks into the engine.
///
/// Feed failures are logged as events and retried after `reconnect_delay`;
/// they never stop matching. Returns once `cancel` fires, or when the feed
/// finishes cleanly (a finite source).
pub async fn run_feed<F: FeedAdapter>(
    state: AppState,
    mut feed: F,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    let (tx, rx) = mpsc::channel(TICK_QUEUE);
    let engine = tokio::spawn(run_engine(state.clone(), rx, cancel.clone()));
    let pair = state.config.pair;

    state.engine().log(
        Level::Info,
        format!("Connecting to {} stream for {}...", feed.name(), pair),
    );

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            r = session(&state, &mut feed, tx.clone()) => r,
        };

        match outcome {
            Ok(()) => break,
            Err(e) => {
                let err = TradingError::from(e);
                state.engine().log(
                    Level::Warn,
                    format!("{}; reconnecting in {:?}", err, reconnect_delay),
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(reconnect_delay) => {}
        }
    }

    if let Err(e) = feed.disconnect().await {
        state
            .engine()
            .log(Level::Error, format!("Error disconnecting feed: {}", e));
    }
    drop(tx);
    let _ = engine.await;
}
