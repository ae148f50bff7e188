use std::{fmt, time::SystemTime};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instrument::Pair;

/// Which side of the market the order is on.
///
/// - `Buy`: fills when the market trades at or below the order's price.
/// - `Sell`: fills when the market trades at or above the order's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// How the order is matched against incoming ticks.
///
/// - `Market`: fills on the next tick at that tick's price
/// - `Limit`: fills at its limit price once a tick crosses it
/// - `StopLimit`: a limit order that only becomes live after its stop price trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
}

impl OrderType {
    /// Exchange wire name, as serialized: `MARKET`, `LIMIT`, `STOP_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLimit => "STOP_LIMIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => f.write_str("Market"),
            OrderType::Limit => f.write_str("Limit"),
            OrderType::StopLimit => f.write_str("Stop-limit"),
        }
    }
}

/// Lifecycle of a paper order. `Filled` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => f.write_str("OPEN"),
            OrderStatus::Filled => f.write_str("FILLED"),
            OrderStatus::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

/// An order request as it arrives from the UI boundary, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}

impl NewOrder {
    pub fn market(side: Side, quantity: Decimal) -> Self {
        Self {
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
        }
    }

    pub fn limit(side: Side, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            stop_price: None,
        }
    }

    pub fn stop_limit(side: Side, quantity: Decimal, stop: Decimal, limit: Decimal) -> Self {
        Self {
            side,
            order_type: OrderType::StopLimit,
            quantity,
            limit_price: Some(limit),
            stop_price: Some(stop),
        }
    }
}

/// A simulated order held in the paper book.
///
/// - `limit_price` is `None` for market orders
/// - `fill_price` is set exactly once, when the order leaves `Open` for `Filled`
/// - `created_at` only serves display; matching priority is insertion order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub pair: Pair,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_triggered: bool,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub created_at: SystemTime,
    pub filled_at: Option<SystemTime>,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

/// One execution produced by the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub time: SystemTime,
}
