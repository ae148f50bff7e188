use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    advisory::AdvisoryGateway,
    engine::MatchingEngine,
    events::{Event, EventLog},
    instrument::{BTC_USDT, Pair},
    window::DEFAULT_WINDOW,
};

/// Simulated exchange round trip before an order reaches the book.
pub const DEFAULT_ACCEPT_LATENCY: Duration = Duration::from_millis(300);
/// Upper bound on a single advisory call.
pub const DEFAULT_ADVISORY_TIMEOUT: Duration = Duration::from_secs(20);

const EVENT_CHANNEL: usize = 1024;

/// Engine parameters shared by the server, the replay command and tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pair: Pair,
    pub window_size: usize,
    pub accept_latency: Duration,
    pub advisory_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pair: BTC_USDT,
            window_size: DEFAULT_WINDOW,
            accept_latency: DEFAULT_ACCEPT_LATENCY,
            advisory_timeout: DEFAULT_ADVISORY_TIMEOUT,
        }
    }
}

/// Shared handle to the engine.
///
/// The engine sits behind a single mutex: tick processing, placement and
/// cancellation each hold it for one whole operation, and display reads
/// copy what they need while holding it.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<MatchingEngine>>,
    pub events_tx: broadcast::Sender<Event>,
    pub advisor: Option<Arc<dyn AdvisoryGateway>>,
    pub config: EngineConfig,
    /// Fires on shutdown; pending submissions and feed tasks hang off it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL);
        let log = EventLog::with_publisher(events_tx.clone());
        let engine = MatchingEngine::with_events(config.pair, config.window_size, log);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            events_tx,
            advisor: None,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn AdvisoryGateway>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Locks the engine. Every critical section is a single synchronous
    /// operation, so a poisoned lock still guards consistent data and is
    /// recovered rather than propagated.
    pub fn engine(&self) -> MutexGuard<'_, MatchingEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new(EngineConfig::default())
    }
}
