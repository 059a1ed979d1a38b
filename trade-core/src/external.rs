//! Contracts for the host game's collaborators.
//!
//! The core never embeds the host's object model. It reads prices, item lists,
//! settlement positions and merchant availability through these traits, and
//! reports player-visible events through a fire-and-forget sink.

use std::cell::Cell;

use crate::types::{ItemId, LocationId, MerchantId, Severity, Timestamp};

/// Source of the current game time.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Authoritative spot prices. Zero or negative means "no usable price".
pub trait PriceOracle {
    fn price_of(&self, item: &ItemId, location: &LocationId) -> i64;
}

/// Tradeable items with equipment and mount categories already filtered out.
pub trait ItemCatalog {
    fn eligible_items(&self) -> Vec<ItemId>;
}

/// Settlement geography and merchant liveness.
pub trait WorldMap {
    fn position(&self, location: &LocationId) -> Option<(f64, f64)>;
    fn prosperity(&self, location: &LocationId) -> f64;
    fn is_merchant_available(&self, merchant: &MerchantId) -> bool;
}

/// Player-visible events: attacks, arrivals, bankruptcies.
pub trait NotificationSink {
    fn notify(&self, message: &str, severity: Severity);
}

/// Straight-line distance between two settlements, if both are known.
pub fn distance_between(world: &dyn WorldMap, from: &LocationId, to: &LocationId) -> Option<f64> {
    let (ax, ay) = world.position(from)?;
    let (bx, by) = world.position(to)?;
    Some(((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
}

/// Everything the host lends the ledger for one scheduler pass.
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    pub clock: &'a dyn Clock,
    pub oracle: &'a dyn PriceOracle,
    pub catalog: &'a dyn ItemCatalog,
    pub world: &'a dyn WorldMap,
    pub notifier: &'a dyn NotificationSink,
}

impl Environment<'_> {
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn distance(&self, from: &LocationId, to: &LocationId) -> Option<f64> {
        distance_between(self.world, from, to)
    }

    /// Oracle price, or `None` when the host has no usable price.
    pub fn usable_price(&self, item: &ItemId, location: &LocationId) -> Option<i64> {
        let price = self.oracle.price_of(item, location);
        (price > 0).then_some(price)
    }
}

/// A clock the host (or a test) sets explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.set(now);
    }

    pub fn advance_hours(&self, hours: f64) {
        self.now.set(self.now.get().add_hours(hours));
    }

    pub fn advance_days(&self, days: f64) {
        self.now.set(self.now.get().add_days(days));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::from_hours(5.0));
        clock.advance_hours(2.5);
        assert_eq!(clock.now().hours(), 7.5);
        clock.advance_days(1.0);
        assert_eq!(clock.now().hours(), 31.5);
    }
}
