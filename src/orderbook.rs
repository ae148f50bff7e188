use std::{collections::HashMap, time::SystemTime};

use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{TradingError, TradingResult},
    instrument::Pair,
    orders::{NewOrder, Order, OrderStatus, OrderType},
};

/// A [`PaperBook`] stores every simulated order ever placed for one pair.
///
/// Orders live in a `Vec` in creation order, with a `HashMap` index from id
/// to position. Nothing is ever removed: cancelled and filled orders stay
/// for display, and only `Open` orders take part in matching.
#[derive(Debug)]
pub struct PaperBook {
    pair: Pair,
    orders: Vec<Order>,
    index: HashMap<Uuid, usize>,
}

/// Checks an incoming request and returns the prices the order will carry.
///
/// Market orders drop any supplied prices; limit-shaped orders must carry a
/// positive limit price, and a stop price, when given, must be positive too.
fn validate(req: &NewOrder) -> TradingResult<(Option<Decimal>, Option<Decimal>)> {
    if req.quantity <= Decimal::ZERO {
        return Err(TradingError::validation("quantity must be > 0"));
    }
    match req.order_type {
        OrderType::Market => Ok((None, None)),
        OrderType::Limit | OrderType::StopLimit => {
            let limit = req.limit_price.ok_or_else(|| {
                TradingError::validation(format!(
                    "limit_price is required for {} orders",
                    req.order_type
                ))
            })?;
            if limit <= Decimal::ZERO {
                return Err(TradingError::validation("limit_price must be > 0"));
            }
            let stop = match (req.order_type, req.stop_price) {
                (OrderType::StopLimit, Some(stop)) if stop <= Decimal::ZERO => {
                    return Err(TradingError::validation("stop_price must be > 0"));
                }
                (OrderType::StopLimit, stop) => stop,
                _ => None,
            };
            Ok((Some(limit), stop))
        }
    }
}

impl PaperBook {
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            orders: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn pair(&self) -> Pair {
        self.pair
    }

    /// Validates and stores a new order with status `Open`.
    ///
    /// This is the only way orders enter the book.
    pub fn place(&mut self, req: NewOrder) -> TradingResult<Order> {
        let (limit_price, stop_price) = validate(&req)?;
        let order = Order {
            id: Uuid::new_v4(),
            pair: self.pair,
            side: req.side,
            order_type: req.order_type,
            quantity: req.quantity,
            limit_price,
            stop_price,
            stop_triggered: false,
            status: OrderStatus::Open,
            fill_price: None,
            created_at: SystemTime::now(),
            filled_at: None,
        };
        self.index.insert(order.id, self.orders.len());
        self.orders.push(order.clone());
        info!(id = %order.id, "order placed: {:?}", order);
        Ok(order)
    }

    pub fn get(&self, id: Uuid) -> Option<&Order> {
        self.index.get(&id).map(|&pos| &self.orders[pos])
    }

    /// Open orders, oldest first.
    pub fn list_open(&self) -> Vec<Order> {
        self.orders.iter().filter(|o| o.is_open()).cloned().collect()
    }

    /// Ids of the open orders, oldest first. Used to freeze the set of
    /// orders a tick is evaluated against.
    pub(crate) fn open_ids(&self) -> Vec<Uuid> {
        self.orders
            .iter()
            .filter(|o| o.is_open())
            .map(|o| o.id)
            .collect()
    }

    pub fn list_all(&self) -> Vec<Order> {
        self.orders.clone()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn open_mut(&mut self, id: Uuid) -> TradingResult<&mut Order> {
        let pos = *self.index.get(&id).ok_or(TradingError::NotFound(id))?;
        let order = &mut self.orders[pos];
        if !order.is_open() {
            return Err(TradingError::InvalidState {
                id,
                status: order.status,
            });
        }
        Ok(order)
    }

    /// Moves an open order to `Cancelled`. Cancelling twice is an error.
    pub fn cancel(&mut self, id: Uuid) -> TradingResult<Order> {
        let order = self.open_mut(id)?;
        order.status = OrderStatus::Cancelled;
        debug!(%id, "order cancelled");
        Ok(order.clone())
    }

    /// Moves an open order to `Filled` at `price`. Only the matching engine
    /// calls this; a second call for the same order is rejected.
    pub(crate) fn mark_filled(
        &mut self,
        id: Uuid,
        price: Decimal,
        at: SystemTime,
    ) -> TradingResult<Order> {
        let order = self.open_mut(id)?;
        order.status = OrderStatus::Filled;
        order.fill_price = Some(price);
        order.filled_at = Some(at);
        Ok(order.clone())
    }

    /// Records that a stop-limit order's stop price has traded.
    pub(crate) fn arm_stop(&mut self, id: Uuid) -> TradingResult<Order> {
        let order = self.open_mut(id)?;
        order.stop_triggered = true;
        Ok(order.clone())
    }
}

//tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instrument::BTC_USDT, orders::Side};
    use rust_decimal_macros::dec;

    fn book() -> PaperBook {
        PaperBook::new(BTC_USDT)
    }

    #[test]
    fn test_place_market_order_is_open() {
        let mut ob = book();
        let o = ob.place(NewOrder::market(Side::Buy, dec!(0.001))).unwrap();
        assert_eq!(o.status, OrderStatus::Open);
        assert_eq!(o.pair, BTC_USDT);
        assert!(o.limit_price.is_none());
        assert_eq!(ob.get(o.id), Some(&o));
    }

    #[test]
    fn test_market_order_drops_supplied_price() {
        let mut ob = book();
        let mut req = NewOrder::market(Side::Sell, dec!(1));
        req.limit_price = Some(dec!(5));
        let o = ob.place(req).unwrap();
        assert!(o.limit_price.is_none());
    }

    #[test]
    fn test_rejects_zero_and_negative_quantity() {
        let mut ob = book();
        for q in [dec!(0), dec!(-1)] {
            let err = ob.place(NewOrder::market(Side::Buy, q)).unwrap_err();
            assert_eq!(err, TradingError::validation("quantity must be > 0"));
        }
        assert!(ob.is_empty());
    }

    #[test]
    fn test_limit_requires_positive_price() {
        let mut ob = book();
        let mut req = NewOrder::limit(Side::Buy, dec!(1), dec!(10));
        req.limit_price = None;
        assert!(matches!(ob.place(req), Err(TradingError::Validation(_))));

        let req = NewOrder::limit(Side::Buy, dec!(1), dec!(0));
        assert!(matches!(ob.place(req), Err(TradingError::Validation(_))));

        let mut req = NewOrder::stop_limit(Side::Sell, dec!(1), dec!(9), dec!(8));
        req.limit_price = None;
        assert!(matches!(ob.place(req), Err(TradingError::Validation(_))));

        let req = NewOrder::stop_limit(Side::Sell, dec!(1), dec!(-9), dec!(8));
        assert!(matches!(ob.place(req), Err(TradingError::Validation(_))));
        assert!(ob.is_empty());
    }

    #[test]
    fn test_list_open_keeps_creation_order() {
        let mut ob = book();
        let a = ob.place(NewOrder::limit(Side::Buy, dec!(1), dec!(10))).unwrap();
        let b = ob.place(NewOrder::limit(Side::Sell, dec!(2), dec!(20))).unwrap();
        let c = ob.place(NewOrder::market(Side::Buy, dec!(3))).unwrap();
        ob.cancel(b.id).unwrap();

        let open: Vec<Uuid> = ob.list_open().iter().map(|o| o.id).collect();
        assert_eq!(open, vec![a.id, c.id]);
        assert_eq!(ob.open_ids(), vec![a.id, c.id]);
        assert_eq!(ob.list_all().len(), 3);
    }

    #[test]
    fn test_cancel_existing_order() {
        let mut ob = book();
        let o = ob.place(NewOrder::limit(Side::Buy, dec!(1), dec!(101))).unwrap();
        let cancelled = ob.cancel(o.id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(ob.list_open().is_empty());
    }

    #[test]
    fn test_double_cancel_is_invalid_state() {
        let mut ob = book();
        let o = ob.place(NewOrder::limit(Side::Buy, dec!(1), dec!(101))).unwrap();
        ob.cancel(o.id).unwrap();
        assert_eq!(
            ob.cancel(o.id).unwrap_err(),
            TradingError::InvalidState {
                id: o.id,
                status: OrderStatus::Cancelled
            }
        );
    }

    #[test]
    fn test_cancel_nonexistent_order() {
        let mut ob = book();
        let id = Uuid::new_v4();
        assert_eq!(ob.cancel(id).unwrap_err(), TradingError::NotFound(id));
    }

    #[test]
    fn test_mark_filled_is_single_use() {
        let mut ob = book();
        let o = ob.place(NewOrder::market(Side::Buy, dec!(1))).unwrap();
        let now = SystemTime::now();
        let filled = ob.mark_filled(o.id, dec!(42), now).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.fill_price, Some(dec!(42)));
        assert_eq!(filled.filled_at, Some(now));

        let again = ob.mark_filled(o.id, dec!(43), now).unwrap_err();
        assert!(matches!(again, TradingError::InvalidState { .. }));
        assert_eq!(ob.get(o.id).unwrap().fill_price, Some(dec!(42)));
    }

    #[test]
    fn test_filled_order_cannot_be_cancelled() {
        let mut ob = book();
        let o = ob.place(NewOrder::market(Side::Sell, dec!(1))).unwrap();
        ob.mark_filled(o.id, dec!(1), SystemTime::now()).unwrap();
        assert!(matches!(
            ob.cancel(o.id),
            Err(TradingError::InvalidState {
                status: OrderStatus::Filled,
                ..
            })
        ));
    }
}
