//! Paper-trading matching engine.
//!
//! The engine owns the [`MarketWindow`], the [`PaperBook`] and the
//! [`EventLog`] and is the only writer of order status once an order is
//! placed (apart from explicit cancels). Each call to
//! [`MatchingEngine::on_tick`] is one whole, synchronous operation:
//!
//! 1. push the tick into the window,
//! 2. freeze the ids of the currently open orders,
//! 3. walk them in creation order and fill the ones whose condition holds.
//!
//! Fill rules:
//! - **Market** fills at the tick price.
//! - **Limit** buy fills when `price <= limit`, sell when `price >= limit`,
//!   always at the limit price (no slippage).
//! - **Stop-limit** with a stop price waits until the stop trades
//!   (buy: `price >= stop`, sell: `price <= stop`), then behaves as a limit
//!   order, starting with the triggering tick. Without a stop price it is a
//!   plain limit order.
//!
//! Orders fill in full or not at all and wait indefinitely.

use rust_decimal::Decimal;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    errors::TradingResult,
    events::{Event, EventLog, Level},
    instrument::Pair,
    orderbook::PaperBook,
    orders::{Fill, NewOrder, Order, OrderType, Side},
    tick::Tick,
    window::MarketWindow,
};

pub struct MatchingEngine {
    window: MarketWindow,
    book: PaperBook,
    events: EventLog,
}

/// Price an order executes at for a tick, if its condition holds.
fn fill_price(order: &Order, price: Decimal) -> Option<Decimal> {
    match order.order_type {
        OrderType::Market => Some(price),
        OrderType::Limit | OrderType::StopLimit => {
            let limit = order.limit_price?;
            let crosses = match order.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            };
            crosses.then_some(limit)
        }
    }
}

fn stop_reached(side: Side, stop: Decimal, price: Decimal) -> bool {
    match side {
        Side::Buy => price >= stop,
        Side::Sell => price <= stop,
    }
}

impl MatchingEngine {
    pub fn new(pair: Pair, window_size: usize) -> Self {
        Self::with_events(pair, window_size, EventLog::new())
    }

    pub fn with_events(pair: Pair, window_size: usize, events: EventLog) -> Self {
        Self {
            window: MarketWindow::new(window_size),
            book: PaperBook::new(pair),
            events,
        }
    }

    pub fn pair(&self) -> Pair {
        self.book.pair()
    }

    pub fn window(&self) -> &MarketWindow {
        &self.window
    }

    pub fn book(&self) -> &PaperBook {
        &self.book
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Appends to the event log. Used for conditions outside matching
    /// (feed outages, advisory results).
    pub fn log(&mut self, level: Level, message: impl Into<String>) -> Event {
        self.events.append(level, message)
    }

    /// Places an order and records it in the event log. Validation failures
    /// are logged as warnings and returned to the caller untouched.
    pub fn place(&mut self, req: NewOrder) -> TradingResult<Order> {
        let pair = self.pair();
        match self.book.place(req) {
            Ok(order) => {
                let msg = match (order.order_type, order.limit_price) {
                    (OrderType::Market, _) => {
                        format!("Order accepted by matching engine. ID: {}", order.id)
                    }
                    (_, Some(limit)) => match order.stop_price {
                        Some(stop) => format!(
                            "{} order active. Waiting for stop {} then limit {} ({} {} {}). ID: {}",
                            order.order_type, stop, limit, order.side, order.quantity, pair, order.id
                        ),
                        None => format!(
                            "{} order active. Waiting for trigger price {} ({} {} {}). ID: {}",
                            order.order_type, limit, order.side, order.quantity, pair, order.id
                        ),
                    },
                    (_, None) => format!("Order accepted. ID: {}", order.id),
                };
                self.events.append(Level::Info, msg);
                Ok(order)
            }
            Err(e) => {
                self.events
                    .append(Level::Warn, format!("Order rejected: {}", e));
                Err(e)
            }
        }
    }

    pub fn cancel(&mut self, id: Uuid) -> TradingResult<Order> {
        match self.book.cancel(id) {
            Ok(order) => {
                self.events.append(
                    Level::Info,
                    format!(
                        "Order cancelled: {} {} {} ({}). ID: {}",
                        order.side,
                        order.quantity,
                        order.pair,
                        order.order_type,
                        order.id
                    ),
                );
                Ok(order)
            }
            Err(e) => {
                self.events
                    .append(Level::Warn, format!("Cancel rejected: {}", e));
                Err(e)
            }
        }
    }

    /// Feeds one tick through the window and the book, returning the fills
    /// it produced in creation order of the filled orders.
    pub fn on_tick(&mut self, tick: Tick) -> Vec<Fill> {
        self.window.on_tick(tick);
        let price = tick.price();
        let pair = self.pair();

        // orders placed after this point wait for the next tick
        let open = self.book.open_ids();
        let mut fills = Vec::new();

        for id in open {
            let Some(order) = self.book.get(id) else {
                continue;
            };

            if order.order_type == OrderType::StopLimit && !order.stop_triggered {
                if let Some(stop) = order.stop_price {
                    if !stop_reached(order.side, stop, price) {
                        continue;
                    }
                    let (side, qty) = (order.side, order.quantity);
                    if let Err(e) = self.book.arm_stop(id) {
                        self.invariant_broken(id, e.to_string());
                        continue;
                    }
                    self.events.append(
                        Level::Info,
                        format!(
                            "Stop triggered at {}: {} {} {} now working as limit. ID: {}",
                            price, side, qty, pair, id
                        ),
                    );
                }
            }

            let Some(order) = self.book.get(id) else {
                continue;
            };
            let Some(exec) = fill_price(order, price) else {
                continue;
            };

            match self.book.mark_filled(id, exec, tick.time()) {
                Ok(filled) => {
                    self.events.append(
                        Level::Success,
                        format!(
                            "{} order FILLED: {} {} {} @ {}",
                            filled.order_type, filled.side, filled.quantity, pair, exec
                        ),
                    );
                    fills.push(Fill {
                        order_id: id,
                        side: filled.side,
                        order_type: filled.order_type,
                        quantity: filled.quantity,
                        price: exec,
                        time: tick.time(),
                    });
                }
                Err(e) => self.invariant_broken(id, e.to_string()),
            }
        }

        debug!(%price, fills = fills.len(), "tick processed");
        fills
    }

    // Can only happen if something other than this engine mutated the book
    // mid-pass. The order is skipped; it is never a reason to stop matching.
    fn invariant_broken(&mut self, id: Uuid, reason: String) {
        error!(%id, "matching invariant violated: {}", reason);
        self.events.append(
            Level::Error,
            format!("Internal error while matching order {}: {}", id, reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instrument::BTC_USDT, orders::OrderStatus};
    use rust_decimal_macros::dec;

    fn engine(n: usize) -> MatchingEngine {
        MatchingEngine::new(BTC_USDT, n)
    }

    fn tick(p: Decimal) -> Tick {
        Tick::now(p).unwrap()
    }

    #[test]
    fn market_order_fills_on_next_tick_at_tick_price() {
        let mut e = engine(10);
        let o = e.place(NewOrder::market(Side::Buy, dec!(0.5))).unwrap();
        let fills = e.on_tick(tick(dec!(123.45)));

        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, o.id);
        assert_eq!(fills[0].price, dec!(123.45));
        let filled = e.book().get(o.id).unwrap().clone();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.fill_price, Some(dec!(123.45)));

        // filled orders are never re-evaluated
        assert!(e.on_tick(tick(dec!(1))).is_empty());
        assert_eq!(e.book().get(o.id).unwrap().fill_price, Some(dec!(123.45)));
    }

    #[test]
    fn limit_buy_fills_at_limit_not_tick() {
        let mut e = engine(10);
        let o = e.place(NewOrder::limit(Side::Buy, dec!(1), dec!(100))).unwrap();
        assert!(e.on_tick(tick(dec!(100.01))).is_empty());
        assert!(e.book().get(o.id).unwrap().is_open());

        let fills = e.on_tick(tick(dec!(97)));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(100));
        assert_eq!(e.book().get(o.id).unwrap().fill_price, Some(dec!(100)));
    }

    #[test]
    fn limit_sell_fills_at_or_above_limit() {
        let mut e = engine(10);
        let o = e.place(NewOrder::limit(Side::Sell, dec!(2), dec!(50))).unwrap();
        assert!(e.on_tick(tick(dec!(49.99))).is_empty());
        let fills = e.on_tick(tick(dec!(50)));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(50));
        assert_eq!(e.book().get(o.id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn cancelled_order_never_matches() {
        let mut e = engine(10);
        let o = e.place(NewOrder::limit(Side::Buy, dec!(1), dec!(100))).unwrap();
        e.cancel(o.id).unwrap();
        assert!(e.on_tick(tick(dec!(1))).is_empty());
        assert_eq!(e.book().get(o.id).unwrap().status, OrderStatus::Cancelled);
        assert!(e.cancel(o.id).is_err());
    }

    #[test]
    fn simultaneous_fills_follow_creation_order() {
        let mut e = engine(10);
        let a = e.place(NewOrder::limit(Side::Sell, dec!(1), dec!(90))).unwrap();
        let b = e.place(NewOrder::market(Side::Buy, dec!(1))).unwrap();
        let c = e.place(NewOrder::limit(Side::Buy, dec!(1), dec!(120))).unwrap();
        let fills = e.on_tick(tick(dec!(100)));
        let ids: Vec<Uuid> = fills.iter().map(|f| f.order_id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);

        let success: Vec<String> = e
            .events()
            .all()
            .into_iter()
            .filter(|ev| ev.level == Level::Success)
            .map(|ev| ev.message)
            .collect();
        assert_eq!(
            success,
            vec![
                "Limit order FILLED: SELL 1 BTCUSDT @ 90",
                "Market order FILLED: BUY 1 BTCUSDT @ 100",
                "Limit order FILLED: BUY 1 BTCUSDT @ 120",
            ]
        );
    }

    #[test]
    fn stop_limit_without_stop_behaves_as_limit() {
        let mut e = engine(10);
        let mut req = NewOrder::stop_limit(Side::Buy, dec!(1), dec!(1), dec!(100));
        req.stop_price = None;
        let o = e.place(req).unwrap();
        let fills = e.on_tick(tick(dec!(99)));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, o.id);
        assert_eq!(fills[0].price, dec!(100));
    }

    #[test]
    fn sell_stop_limit_waits_for_stop() {
        let mut e = engine(10);
        // protect at 95, sell no lower than 94
        let o = e
            .place(NewOrder::stop_limit(Side::Sell, dec!(1), dec!(95), dec!(94)))
            .unwrap();

        // a plain sell limit at 94 would fill here; the stop has not traded
        assert!(e.on_tick(tick(dec!(100))).is_empty());
        assert!(!e.book().get(o.id).unwrap().stop_triggered);

        // stop trades and the limit holds on the same tick
        let fills = e.on_tick(tick(dec!(94.5)));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(94));
        let o = e.book().get(o.id).unwrap();
        assert!(o.stop_triggered);
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn buy_stop_limit_arms_then_waits_for_limit() {
        let mut e = engine(10);
        let o = e
            .place(NewOrder::stop_limit(Side::Buy, dec!(1), dec!(105), dec!(103)))
            .unwrap();

        assert!(e.on_tick(tick(dec!(100))).is_empty());
        // stop traded but the price is above the limit
        assert!(e.on_tick(tick(dec!(106))).is_empty());
        assert!(e.book().get(o.id).unwrap().stop_triggered);
        assert!(e.book().get(o.id).unwrap().is_open());

        let fills = e.on_tick(tick(dec!(102)));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(103));
    }

    #[test]
    fn rejected_place_logs_warning() {
        let mut e = engine(10);
        assert!(e.place(NewOrder::market(Side::Buy, dec!(0))).is_err());
        let last = e.events().all().pop().unwrap();
        assert_eq!(last.level, Level::Warn);
        assert!(last.message.contains("quantity must be > 0"));
    }

    #[test]
    fn window_and_book_scenario() {
        let mut e = engine(3);
        e.on_tick(tick(dec!(100)));

        let limit = e.place(NewOrder::limit(Side::Buy, dec!(1), dec!(99))).unwrap();
        assert!(e.on_tick(tick(dec!(101))).is_empty());
        let fills = e.on_tick(tick(dec!(99)));
        assert_eq!(fills.len(), 1);
        let limit = e.book().get(limit.id).unwrap().clone();
        assert_eq!(limit.status, OrderStatus::Filled);
        assert_eq!(limit.fill_price, Some(dec!(99)));

        let market = e.place(NewOrder::market(Side::Sell, dec!(1))).unwrap();
        let fills = e.on_tick(tick(dec!(98)));
        assert_eq!(fills.len(), 1);
        let market = e.book().get(market.id).unwrap();
        assert_eq!(market.status, OrderStatus::Filled);
        assert_eq!(market.fill_price, Some(dec!(98)));

        assert_eq!(e.window().prices(), vec![dec!(101), dec!(99), dec!(98)]);
    }
}
