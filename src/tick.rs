use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::{TradingError, TradingResult};

/// One observed price update for the instrument.
///
/// Ticks are immutable once built; [`Tick::new`] is the only constructor and
/// it refuses non-positive prices, so everything downstream of the feed
/// boundary may assume `price > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tick {
    time: SystemTime,
    price: Decimal,
}

impl Tick {
    pub fn new(time: SystemTime, price: Decimal) -> TradingResult<Self> {
        if price <= Decimal::ZERO {
            return Err(TradingError::validation(format!(
                "tick price must be > 0, got {}",
                price
            )));
        }
        Ok(Tick { time, price })
    }

    /// Tick stamped with the current wall clock.
    pub fn now(price: Decimal) -> TradingResult<Self> {
        Self::new(SystemTime::now(), price)
    }

    /// Tick stamped with an exchange time in milliseconds since the epoch.
    pub fn at_millis(ms: u64, price: Decimal) -> TradingResult<Self> {
        Self::new(UNIX_EPOCH + Duration::from_millis(ms), price)
    }

    pub fn time(&self) -> SystemTime {
        self.time
    }

    pub fn price(&self) -> Decimal {
        self.price
    }
}
