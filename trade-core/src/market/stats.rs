use serde::{Deserialize, Serialize};

use crate::types::{LocationId, Quantity};

/// Running totals of the player's own trades in one item.
///
/// Both averages use the exact incremental mean, so they always equal the
/// volume-weighted mean of every recorded trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemStats {
    pub total_purchased: Quantity,
    pub total_sold: Quantity,
    pub total_profit: i64,
    pub avg_buy_price: f64,
    pub avg_sell_price: f64,
    pub best_buy_location: Option<LocationId>,
    pub best_buy_price: i64,
    pub best_sell_location: Option<LocationId>,
    pub best_sell_price: i64,
}

fn incremental_mean(old_avg: f64, old_count: Quantity, price: i64, qty: Quantity) -> f64 {
    let new_count = old_count + qty;
    if new_count <= 0 {
        return 0.0;
    }
    (old_avg * old_count as f64 + price as f64 * qty as f64) / new_count as f64
}

impl ItemStats {
    pub fn record_purchase(&mut self, qty: Quantity, price: i64, location: &LocationId) {
        if qty <= 0 || price <= 0 {
            return;
        }
        self.avg_buy_price = incremental_mean(self.avg_buy_price, self.total_purchased, price, qty);
        self.total_purchased += qty;
        if self.best_buy_location.is_none() || price < self.best_buy_price {
            self.best_buy_location = Some(location.clone());
            self.best_buy_price = price;
        }
    }

    /// Record a sale and return the realised profit against the average buy price.
    pub fn record_sale(&mut self, qty: Quantity, price: i64, location: &LocationId) -> i64 {
        if qty <= 0 || price <= 0 {
            return 0;
        }
        self.avg_sell_price = incremental_mean(self.avg_sell_price, self.total_sold, price, qty);
        self.total_sold += qty;
        let profit = ((price as f64 - self.avg_buy_price) * qty as f64).round() as i64;
        self.total_profit += profit;
        if self.best_sell_location.is_none() || price > self.best_sell_price {
            self.best_sell_location = Some(location.clone());
            self.best_sell_price = price;
        }
        profit
    }
}
