use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::market::history::PriceHistory;
use crate::market::routes::ProfitableRoute;
use crate::market::stats::ItemStats;
use crate::types::{ItemId, LocationId, Quantity, Timestamp};

// === ANALYTICS CONSTANTS ===

/// Window used for location comparisons and route margins.
pub const REFERENCE_WINDOW_DAYS: f64 = 7.0;
/// Routes at or below this margin are not worth reporting.
pub const MIN_ROUTE_MARGIN_PERCENT: f64 = 10.0;
/// (window days, weight) pairs blended into a forecast.
const FORECAST_BLEND: [(f64, f64); 3] = [(3.0, 0.5), (7.0, 0.3), (14.0, 0.2)];
const FORECAST_JITTER: f64 = 0.05;

/// Price history and trade statistics shared by every simulated asset.
///
/// Histories are keyed item-first so per-item scans (best locations, route
/// discovery) never touch unrelated items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTracker {
    pub retention_days: f64,
    histories: BTreeMap<ItemId, BTreeMap<LocationId, PriceHistory>>,
    stats: BTreeMap<ItemId, ItemStats>,
}

impl Default for PriceTracker {
    fn default() -> Self {
        Self::new(45.0)
    }
}

impl PriceTracker {
    pub fn new(retention_days: f64) -> Self {
        Self {
            retention_days,
            histories: BTreeMap::new(),
            stats: BTreeMap::new(),
        }
    }

    // === Recording ===

    /// Record an observed price. Same-day repeats and unusable prices are dropped.
    pub fn record_price(
        &mut self,
        item: &ItemId,
        location: &LocationId,
        price: i64,
        now: Timestamp,
    ) -> bool {
        if price <= 0 || item.is_blank() || location.is_blank() {
            return false;
        }
        let recorded = self
            .histories
            .entry(item.clone())
            .or_default()
            .entry(location.clone())
            .or_insert_with(|| PriceHistory::new(item.clone(), location.clone()))
            .record(now, price);

        #[cfg(feature = "instrument")]
        {
            if recorded {
                tracing::info!(
                    target: "price",
                    day = now.day_index(),
                    item = item.as_str(),
                    location = location.as_str(),
                    price = price,
                );
            }
        }
        recorded
    }

    /// Periodic maintenance: drop points beyond the retention horizon.
    /// Pruning happens here rather than on every write.
    pub fn update(&mut self, now: Timestamp) -> usize {
        let cutoff = now.add_days(-self.retention_days);
        let mut pruned = 0;
        for by_location in self.histories.values_mut() {
            for history in by_location.values_mut() {
                pruned += history.prune_before(cutoff);
            }
            by_location.retain(|_, h| !h.is_empty());
        }
        self.histories.retain(|_, by_location| !by_location.is_empty());
        pruned
    }

    pub fn record_purchase(&mut self, item: &ItemId, qty: Quantity, price: i64, location: &LocationId) {
        self.stats
            .entry(item.clone())
            .or_default()
            .record_purchase(qty, price, location);
    }

    /// Record a sale; returns profit against the running average buy price.
    pub fn record_sale(&mut self, item: &ItemId, qty: Quantity, price: i64, location: &LocationId) -> i64 {
        self.stats
            .entry(item.clone())
            .or_default()
            .record_sale(qty, price, location)
    }

    // === Queries ===

    pub fn history(&self, item: &ItemId, location: &LocationId) -> Option<&PriceHistory> {
        self.histories.get(item)?.get(location)
    }

    pub fn item_stats(&self, item: &ItemId) -> Option<&ItemStats> {
        self.stats.get(item)
    }

    pub fn tracked_items(&self) -> impl Iterator<Item = &ItemId> {
        self.histories.keys()
    }

    pub fn total_points(&self) -> usize {
        self.histories
            .values()
            .flat_map(|by_location| by_location.values())
            .map(|h| h.points.len())
            .sum()
    }

    pub fn current_price(&self, item: &ItemId, location: &LocationId) -> Option<i64> {
        self.history(item, location)?.latest().map(|p| p.price)
    }

    /// Mean over the trailing window; latest point if the window is empty; 0 without history.
    pub fn average_price(&self, item: &ItemId, location: &LocationId, window_days: f64, now: Timestamp) -> f64 {
        self.history(item, location)
            .map(|h| h.average(now, window_days))
            .unwrap_or(0.0)
    }

    pub fn trend(&self, item: &ItemId, location: &LocationId, window_days: f64, now: Timestamp) -> f64 {
        self.history(item, location)
            .map(|h| h.trend(now, window_days))
            .unwrap_or(0.0)
    }

    /// Projected price `days_ahead` from now.
    ///
    /// Each trend is turned into a per-day rate before blending, then applied
    /// linearly to the latest price with a small random jitter. Returns 0 when
    /// there is no history; otherwise at least 1.
    pub fn forecast<R: Rng + ?Sized>(
        &self,
        item: &ItemId,
        location: &LocationId,
        days_ahead: f64,
        now: Timestamp,
        rng: &mut R,
    ) -> i64 {
        let Some(current) = self.current_price(item, location) else {
            return 0;
        };
        let daily_rate: f64 = FORECAST_BLEND
            .iter()
            .map(|&(window, weight)| weight * self.trend(item, location, window, now) / 100.0 / window)
            .sum();
        let jitter = 1.0 + (rng.random::<f64>() * 2.0 - 1.0) * FORECAST_JITTER;
        let projected = current as f64 * (1.0 + daily_rate * days_ahead.max(0.0)) * jitter;
        (projected.round() as i64).max(1)
    }

    /// 7-day averages per location holding history for `item`.
    fn reference_averages(&self, item: &ItemId, now: Timestamp) -> Vec<(&LocationId, f64)> {
        self.histories
            .get(item)
            .map(|by_location| {
                by_location
                    .iter()
                    .map(|(loc, h)| (loc, h.average(now, REFERENCE_WINDOW_DAYS)))
                    .filter(|(_, avg)| *avg > 0.0)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn best_buy_location(&self, item: &ItemId, now: Timestamp) -> Option<LocationId> {
        self.reference_averages(item, now)
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(loc, _)| loc.clone())
    }

    pub fn best_sell_location(&self, item: &ItemId, now: Timestamp) -> Option<LocationId> {
        self.reference_averages(item, now)
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(loc, _)| loc.clone())
    }

    /// Every ordered location pair with a 7-day margin above 10%, best first.
    pub fn profitable_routes(&self, top_n: usize, now: Timestamp) -> Vec<ProfitableRoute> {
        let mut routes = Vec::new();
        for item in self.histories.keys() {
            let averages = self.reference_averages(item, now);
            if averages.len() < 2 {
                continue;
            }
            for (buy_loc, buy_avg) in &averages {
                for (sell_loc, sell_avg) in &averages {
                    if buy_loc == sell_loc {
                        continue;
                    }
                    let margin = (sell_avg - buy_avg) / buy_avg * 100.0;
                    if margin > MIN_ROUTE_MARGIN_PERCENT {
                        routes.push(ProfitableRoute {
                            item_id: item.clone(),
                            buy_location: (*buy_loc).clone(),
                            sell_location: (*sell_loc).clone(),
                            buy_price: *buy_avg,
                            sell_price: *sell_avg,
                            margin_percent: margin,
                        });
                    }
                }
            }
        }
        routes.sort_by(|a, b| b.margin_percent.total_cmp(&a.margin_percent));
        routes.truncate(top_n);
        routes
    }

    // === Restore ===

    /// Re-establish ordering and key consistency after deserialization.
    pub(crate) fn normalize(&mut self) {
        for (item, by_location) in self.histories.iter_mut() {
            for (location, history) in by_location.iter_mut() {
                history.item_id = item.clone();
                history.location_id = location.clone();
                history.points.retain(|p| p.price > 0);
                history
                    .points
                    .sort_by(|a, b| a.timestamp.0.total_cmp(&b.timestamp.0));
                history
                    .points
                    .dedup_by_key(|p| p.timestamp.day_index());
            }
            by_location.retain(|_, h| !h.is_empty());
        }
        self.histories.retain(|_, by_location| !by_location.is_empty());
    }
}
