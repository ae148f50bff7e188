use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::tick::Tick;

pub const DEFAULT_WINDOW: usize = 50;

/// Bounded rolling buffer of the most recent ticks, oldest evicted first.
///
/// The window never holds more than `capacity` ticks and always holds the
/// contiguous most-recent ones, in arrival order.
#[derive(Debug, Clone)]
pub struct MarketWindow {
    ticks: VecDeque<Tick>,
    capacity: usize,
}

impl MarketWindow {
    /// A zero capacity is bumped to one so the latest tick is always visible.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn on_tick(&mut self, tick: Tick) {
        self.ticks.push_back(tick);
        while self.ticks.len() > self.capacity {
            self.ticks.pop_front();
        }
    }

    /// Owned copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<Tick> {
        self.ticks.iter().copied().collect()
    }

    pub fn prices(&self) -> Vec<Decimal> {
        self.ticks.iter().map(Tick::price).collect()
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MarketWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
