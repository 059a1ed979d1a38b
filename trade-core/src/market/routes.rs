use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::TradeError;
use crate::external::{WorldMap, distance_between};
use crate::market::tracker::{PriceTracker, REFERENCE_WINDOW_DAYS};
use crate::types::{ItemId, LocationId, Quantity, Timestamp};

/// Distance units a caravan covers per day at speed 1.0.
pub const CARAVAN_DISTANCE_PER_DAY: f64 = 30.0;

/// Days a caravan needs for one leg; never less than a day.
pub fn caravan_travel_days(distance: f64, speed: f64) -> f64 {
    let pace = CARAVAN_DISTANCE_PER_DAY * speed.max(0.01);
    (distance / pace).max(1.0)
}

/// A buy-here-sell-there opportunity found in the price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct ProfitableRoute {
    pub item_id: ItemId,
    pub buy_location: LocationId,
    pub sell_location: LocationId,
    /// 7-day average at the buy location.
    pub buy_price: f64,
    /// 7-day average at the sell location.
    pub sell_price: f64,
    pub margin_percent: f64,
}

/// Ordered waypoints a caravan can follow. A planning artifact; it is not
/// simulated on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct TradeRoute {
    pub waypoints: Vec<LocationId>,
    pub is_circular: bool,
    pub estimated_duration_days: f64,
    pub expected_profit: i64,
}

impl TradeRoute {
    pub fn new(waypoints: Vec<LocationId>, is_circular: bool) -> Result<Self, TradeError> {
        if waypoints.len() < 2 {
            return Err(TradeError::RouteTooShort);
        }
        if waypoints.iter().any(LocationId::is_blank) {
            return Err(TradeError::MissingId("waypoint"));
        }
        Ok(Self {
            waypoints,
            is_circular,
            estimated_duration_days: 0.0,
            expected_profit: 0,
        })
    }

    /// Build a route and estimate its duration at caravan pace, one trading
    /// day per stop.
    pub fn plan(
        waypoints: Vec<LocationId>,
        is_circular: bool,
        world: &dyn WorldMap,
        speed: f64,
    ) -> Result<Self, TradeError> {
        let mut route = Self::new(waypoints, is_circular)?;
        let mut days = 0.0;
        for (from, to) in route.legs() {
            let distance = distance_between(world, from, to)
                .ok_or_else(|| TradeError::UnknownLocation(to.clone()))?;
            days += caravan_travel_days(distance, speed) + 1.0;
        }
        route.estimated_duration_days = days;
        Ok(route)
    }

    /// Two-stop route for a discovered opportunity.
    pub fn from_opportunity(
        opportunity: &ProfitableRoute,
        world: &dyn WorldMap,
        speed: f64,
    ) -> Result<Self, TradeError> {
        Self::plan(
            vec![
                opportunity.buy_location.clone(),
                opportunity.sell_location.clone(),
            ],
            false,
            world,
            speed,
        )
    }

    /// Consecutive waypoint pairs, including the closing leg of a circular route.
    pub fn legs(&self) -> Vec<(&LocationId, &LocationId)> {
        let mut legs: Vec<_> = self
            .waypoints
            .windows(2)
            .filter_map(|w| match w {
                [a, b] => Some((a, b)),
                _ => None,
            })
            .collect();
        if self.is_circular {
            if let (Some(last), Some(first)) = (self.waypoints.last(), self.waypoints.first()) {
                legs.push((last, first));
            }
        }
        legs
    }

    /// Index of the stop after `index`, wrapping on circular routes.
    pub fn next_index(&self, index: usize) -> Option<usize> {
        if index + 1 < self.waypoints.len() {
            Some(index + 1)
        } else if self.is_circular && !self.waypoints.is_empty() {
            Some(0)
        } else {
            None
        }
    }

    pub fn waypoint(&self, index: usize) -> Option<&LocationId> {
        self.waypoints.get(index)
    }

    /// Estimate profit from the best weekly spread on each leg for a full hold.
    pub fn with_expected_profit(mut self, tracker: &PriceTracker, now: Timestamp, cargo_units: Quantity) -> Self {
        let items: Vec<ItemId> = tracker.tracked_items().cloned().collect();
        let mut profit = 0.0;
        for (from, to) in self.legs() {
            let best_spread = items
                .iter()
                .filter_map(|item| {
                    let buy = tracker.average_price(item, from, REFERENCE_WINDOW_DAYS, now);
                    let sell = tracker.average_price(item, to, REFERENCE_WINDOW_DAYS, now);
                    (buy > 0.0 && sell > 0.0).then_some(sell - buy)
                })
                .fold(0.0_f64, f64::max);
            profit += best_spread * cargo_units.max(0) as f64;
        }
        self.expected_profit = profit.round() as i64;
        self
    }
}
