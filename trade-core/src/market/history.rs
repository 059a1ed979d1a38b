use serde::{Deserialize, Serialize};

use crate::types::{ItemId, LocationId, Timestamp};

/// One observed price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub price: i64,
}

/// Time-ordered price observations for one item at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub points: Vec<PricePoint>,
}

impl PriceHistory {
    pub fn new(item_id: ItemId, location_id: LocationId) -> Self {
        Self {
            item_id,
            location_id,
            points: Vec::new(),
        }
    }

    /// Add an observation. Returns false when the price is unusable or the
    /// same simulated day already has a point.
    pub fn record(&mut self, timestamp: Timestamp, price: i64) -> bool {
        if price <= 0 {
            return false;
        }
        let day = timestamp.day_index();
        if self.points.iter().any(|p| p.timestamp.day_index() == day) {
            return false;
        }
        let idx = self.points.partition_point(|p| p.timestamp <= timestamp);
        self.points.insert(idx, PricePoint { timestamp, price });
        true
    }

    /// Drop points strictly older than `cutoff`. Returns how many were removed.
    pub fn prune_before(&mut self, cutoff: Timestamp) -> usize {
        let before = self.points.len();
        self.points.retain(|p| p.timestamp >= cutoff);
        before - self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<PricePoint> {
        self.points.last().copied()
    }

    /// Points within the trailing `window_days` ending at `now`.
    fn window(&self, now: Timestamp, window_days: f64) -> impl Iterator<Item = &PricePoint> {
        let start = now.add_days(-window_days);
        self.points
            .iter()
            .filter(move |p| p.timestamp >= start && p.timestamp <= now)
    }

    /// Mean price in the window, falling back to the latest point, then 0.
    pub fn average(&self, now: Timestamp, window_days: f64) -> f64 {
        let (sum, count) = self
            .window(now, window_days)
            .fold((0i64, 0usize), |(s, c), p| (s + p.price, c + 1));
        if count > 0 {
            sum as f64 / count as f64
        } else {
            self.latest().map(|p| p.price as f64).unwrap_or(0.0)
        }
    }

    /// Percentage change from the oldest to the newest point inside the window.
    pub fn trend(&self, now: Timestamp, window_days: f64) -> f64 {
        let mut in_window = self.window(now, window_days);
        let Some(first) = in_window.next() else {
            return 0.0;
        };
        let Some(last) = in_window.last() else {
            return 0.0;
        };
        if first.price <= 0 {
            return 0.0;
        }
        (last.price - first.price) as f64 / first.price as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> PriceHistory {
        PriceHistory::new(ItemId::from("grain"), LocationId::from("town"))
    }

    #[test]
    fn same_day_duplicates_are_suppressed() {
        let mut h = history();
        assert!(h.record(Timestamp::from_hours(1.0), 10));
        assert!(!h.record(Timestamp::from_hours(20.0), 12));
        assert!(h.record(Timestamp::from_hours(25.0), 12));
        assert_eq!(h.points.len(), 2);
    }

    #[test]
    fn non_positive_prices_rejected() {
        let mut h = history();
        assert!(!h.record(Timestamp::ZERO, 0));
        assert!(!h.record(Timestamp::ZERO, -3));
        assert!(h.is_empty());
    }

    #[test]
    fn late_points_are_inserted_in_order() {
        let mut h = history();
        h.record(Timestamp::from_days(3.0), 30);
        h.record(Timestamp::from_days(1.0), 10);
        h.record(Timestamp::from_days(2.0), 20);
        let prices: Vec<i64> = h.points.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![10, 20, 30]);
    }

    #[test]
    fn average_falls_back_to_latest() {
        let mut h = history();
        assert_eq!(h.average(Timestamp::from_days(5.0), 7.0), 0.0);
        h.record(Timestamp::from_days(0.0), 40);
        assert_eq!(h.average(Timestamp::from_days(100.0), 7.0), 40.0);
    }

    #[test]
    fn trend_is_endpoint_delta() {
        let mut h = history();
        h.record(Timestamp::from_days(0.0), 100);
        h.record(Timestamp::from_days(1.0), 50);
        h.record(Timestamp::from_days(2.0), 120);
        let trend = h.trend(Timestamp::from_days(2.0), 7.0);
        assert!((trend - 20.0).abs() < 1e-9, "trend = {trend}");
        assert_eq!(h.trend(Timestamp::from_days(2.0), 0.5), 0.0);
    }

    #[test]
    fn prune_removes_old_points() {
        let mut h = history();
        for day in 0..10 {
            h.record(Timestamp::from_days(day as f64), 10 + day);
        }
        assert_eq!(h.prune_before(Timestamp::from_days(5.0)), 5);
        assert_eq!(h.points.first().map(|p| p.price), Some(15));
    }
}
