//! Tunable knobs for the trade simulation.
//!
//! The host owns how these are loaded; the core only reads the current values.
//! Every field has a default so partial JSON documents are accepted.

use serde::{Deserialize, Serialize};

use crate::error::TradeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    // === Limits ===
    pub max_shops: usize,
    pub max_caravans: usize,
    /// Couriers that are not yet delivered or lost.
    pub max_couriers: usize,
    pub max_agreements_per_merchant: usize,

    // === Shops ===
    pub shop_establish_cost: i64,
    pub shop_base_daily_income: i64,
    pub shop_upkeep_per_level: i64,
    pub shop_upgrade_base_cost: i64,
    pub shop_max_level: u32,
    pub shop_base_storage: i64,
    pub shop_storage_per_level: i64,
    pub shop_hire_cost: i64,
    pub shop_base_wage: i64,
    /// Fraction of each inventory line sold per day before modifiers.
    pub shop_daily_turnover: f64,
    pub shop_default_margin: f64,

    // === Caravans ===
    pub caravan_idle_daily_income: i64,
    pub caravan_base_daily_cost: i64,
    pub base_security_cost: f64,
    pub security_cost_multiplier: f64,
    pub max_security_level: u32,
    pub security_upgrade_base_cost: i64,
    pub cargo_upgrade_base_cost: i64,
    pub cargo_upgrade_step: i64,
    pub caravan_default_cargo_capacity: i64,
    pub caravan_default_speed: f64,
    /// Deltas shorter than this are carried to the next tick.
    pub caravan_min_tick_days: f64,
    /// Scales the per-tick ambush chance on the road.
    pub caravan_risk_factor: f64,

    // === Couriers ===
    pub courier_base_cost: i64,
    pub courier_distance_multiplier: f64,
    pub courier_risk_factor: f64,

    // === Merchant relations ===
    pub initial_trust: f64,
    pub relationship_gain_factor: f64,
    pub trust_decay_per_day: f64,
    pub trust_inactivity_days: f64,
    pub min_trust_for_agreement: f64,

    // === Price analytics ===
    pub price_retention_days: f64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            max_shops: 5,
            max_caravans: 5,
            max_couriers: 3,
            max_agreements_per_merchant: 3,

            shop_establish_cost: 10_000,
            shop_base_daily_income: 100,
            shop_upkeep_per_level: 20,
            shop_upgrade_base_cost: 5_000,
            shop_max_level: 5,
            shop_base_storage: 500,
            shop_storage_per_level: 250,
            shop_hire_cost: 500,
            shop_base_wage: 10,
            shop_daily_turnover: 0.1,
            shop_default_margin: 0.2,

            caravan_idle_daily_income: 50,
            caravan_base_daily_cost: 50,
            base_security_cost: 20.0,
            security_cost_multiplier: 1.0,
            max_security_level: 5,
            security_upgrade_base_cost: 1_000,
            cargo_upgrade_base_cost: 800,
            cargo_upgrade_step: 100,
            caravan_default_cargo_capacity: 500,
            caravan_default_speed: 1.0,
            caravan_min_tick_days: 0.1,
            caravan_risk_factor: 1.0,

            courier_base_cost: 100,
            courier_distance_multiplier: 0.5,
            courier_risk_factor: 1.0,

            initial_trust: 30.0,
            relationship_gain_factor: 1.0,
            trust_decay_per_day: 0.5,
            trust_inactivity_days: 14.0,
            min_trust_for_agreement: 20.0,

            price_retention_days: 45.0,
        }
    }
}

impl TradeConfig {
    /// Parse a (possibly partial) JSON document; missing knobs keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, TradeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Daily running cost of a caravan at the given security level.
    pub fn caravan_daily_cost(&self, security_level: u32) -> f64 {
        self.caravan_base_daily_cost as f64
            + security_level as f64 * self.base_security_cost * self.security_cost_multiplier
    }

    pub fn shop_storage_for_level(&self, level: u32) -> i64 {
        self.shop_base_storage + self.shop_storage_per_level * i64::from(level.saturating_sub(1))
    }
}
