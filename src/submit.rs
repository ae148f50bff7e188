//! Delayed order acceptance.
//!
//! Orders do not reach the book the moment they are sent: [`submit`] logs
//! the request, then spawns a task that waits out the configured acceptance
//! latency and only then places the order. The wait is raced against a
//! [`CancellationToken`], so a pending submission can be withdrawn (or torn
//! down on shutdown) without ever touching the book.

use std::time::Duration;

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    errors::{TradingError, TradingResult},
    events::Level,
    orders::{NewOrder, Order},
    state::AppState,
};

/// Handle to an order that has been sent but not yet accepted.
pub struct PendingOrder {
    handle: JoinHandle<TradingResult<Option<Order>>>,
    cancel: CancellationToken,
}

impl PendingOrder {
    /// Withdraws the submission if it has not been accepted yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the outcome. `Ok(None)` means the submission was withdrawn
    /// before the book saw it.
    pub async fn accepted(self) -> TradingResult<Option<Order>> {
        self.handle
            .await
            .map_err(|e| TradingError::Upstream(format!("order submission task failed: {}", e)))?
    }
}

/// Sends `req` to the engine after `delay`.
///
/// `parent` ties the submission to a wider lifetime (e.g. server shutdown);
/// cancelling it also withdraws the order.
pub fn submit(
    state: &AppState,
    req: NewOrder,
    delay: Duration,
    parent: &CancellationToken,
) -> PendingOrder {
    let pair = state.config.pair;
    state.engine().log(
        Level::Info,
        format!(
            "Sending order: {} {} {} ({})",
            req.side, req.quantity, pair, req.order_type
        ),
    );

    let cancel = parent.child_token();
    let token = cancel.clone();
    let state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("order submission withdrawn before acceptance");
                state.engine().log(
                    Level::Warn,
                    format!("Order withdrawn before acceptance: {} {} {}", req.side, req.quantity, pair),
                );
                Ok(None)
            }
            _ = sleep(delay) => {
                let placed = state.engine().place(req);
                placed.map(Some)
            }
        }
    });

    PendingOrder { handle, cancel }
}
