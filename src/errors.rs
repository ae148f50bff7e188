use thiserror::Error;
use uuid::Uuid;

use crate::orders::OrderStatus;

/// Errors surfaced by the paper-trading core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradingError {
    /// Malformed order parameters, rejected before any state mutation.
    #[error("{0}")]
    Validation(String),

    #[error("order {0} not found")]
    NotFound(Uuid),

    /// The order is not in the state the operation requires.
    #[error("order {id} is {status}, expected OPEN")]
    InvalidState { id: Uuid, status: OrderStatus },

    /// Feed or advisory collaborator unreachable.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

impl TradingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TradingError::Validation(msg.into())
    }
}

pub type TradingResult<T> = Result<T, TradingError>;

/// Failures of a price feed adapter.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("feed closed")]
    Closed,
}

/// Failures of the advisory gateway.
#[derive(Error, Debug)]
pub enum AdvisoryError {
    #[error("insufficient data: {have} of {need} price points")]
    InsufficientData { have: usize, need: usize },
    #[error("advisory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("advisory request timed out")]
    Timeout,
    #[error("advisory returned no text")]
    Empty,
    #[error("advisory not configured")]
    NotConfigured,
}

impl From<FeedError> for TradingError {
    fn from(e: FeedError) -> Self {
        TradingError::Upstream(e.to_string())
    }
}

impl From<AdvisoryError> for TradingError {
    fn from(e: AdvisoryError) -> Self {
        match e {
            AdvisoryError::InsufficientData { .. } => TradingError::Validation(e.to_string()),
            other => TradingError::Upstream(other.to_string()),
        }
    }
}
