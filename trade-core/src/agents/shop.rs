use std::collections::BTreeMap;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::TradeConfig;
use crate::error::TradeError;
use crate::external::PriceOracle;
use crate::market::PriceTracker;
use crate::tick::{Simulated, TickContext};
use crate::types::{Denars, ItemId, LocationId, Quantity, Severity, ShopId, Timestamp};

// === SHOP CONSTANTS ===

/// Extra turnover per fully skilled employee.
const SKILL_TURNOVER_BONUS: f64 = 0.5;
/// Prosperity at which commission income is at its base rate.
const REFERENCE_PROSPERITY: f64 = 5000.0;
const PROSPERITY_FACTOR_RANGE: (f64, f64) = (0.5, 2.0);
const BASE_STAFF_LIMIT: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct Employee {
    pub name: String,
    /// 10..=100
    pub skill: u32,
    pub daily_wage: Denars,
}

impl Employee {
    pub fn new(name: impl Into<String>, skill: u32, config: &TradeConfig) -> Self {
        let skill = skill.clamp(10, 100);
        Self {
            name: name.into(),
            skill,
            daily_wage: config.shop_base_wage + i64::from(skill / 10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WholesaleShop {
    pub id: ShopId,
    pub location_id: LocationId,
    pub capital: Denars,
    pub inventory: BTreeMap<ItemId, Quantity>,
    pub employees: Vec<Employee>,
    pub profit_margin: f64,
    pub level: u32,
    pub storage_capacity: Quantity,
    pub is_active: bool,
    pub last_update: Timestamp,
    pub lifetime_sales: Denars,
    #[serde(default)]
    pub unsettled: f64,
}

impl WholesaleShop {
    pub fn new(
        id: ShopId,
        location_id: LocationId,
        capital: Denars,
        now: Timestamp,
        config: &TradeConfig,
    ) -> Self {
        Self {
            id,
            location_id,
            capital,
            inventory: BTreeMap::new(),
            employees: Vec::new(),
            profit_margin: config.shop_default_margin.clamp(0.0, 1.0),
            level: 1,
            storage_capacity: config.shop_storage_for_level(1),
            is_active: true,
            last_update: now,
            lifetime_sales: 0,
            unsettled: 0.0,
        }
    }

    // === Queries ===

    pub fn stored_units(&self) -> Quantity {
        self.inventory.values().sum()
    }

    pub fn free_storage(&self) -> Quantity {
        (self.storage_capacity - self.stored_units()).max(0)
    }

    pub fn staff_limit(&self) -> usize {
        BASE_STAFF_LIMIT + self.level as usize
    }

    pub fn daily_wages(&self) -> Denars {
        self.employees.iter().map(|e| e.daily_wage).sum()
    }

    /// Share of each inventory line sold per day.
    pub fn turnover(&self, config: &TradeConfig) -> f64 {
        let staff: f64 = self
            .employees
            .iter()
            .map(|e| e.skill as f64 / 100.0 * SKILL_TURNOVER_BONUS)
            .sum();
        (config.shop_daily_turnover * (1.0 + staff) * (1.0 - self.profit_margin)).clamp(0.0, 1.0)
    }

    pub fn upgrade_cost(&self, config: &TradeConfig) -> Denars {
        config.shop_upgrade_base_cost * i64::from(self.level)
    }

    // === Commands ===

    /// Buy goods into storage at the local spot price.
    pub fn stock_item(
        &mut self,
        item: &ItemId,
        quantity: Quantity,
        oracle: &dyn PriceOracle,
        prices: &mut PriceTracker,
    ) -> Result<bool, TradeError> {
        if item.is_blank() {
            return Err(TradeError::MissingId("item"));
        }
        if quantity <= 0 {
            return Err(TradeError::NonPositiveQuantity(quantity));
        }
        if !self.is_active {
            return Ok(false);
        }
        let price = oracle.price_of(item, &self.location_id);
        if price <= 0 {
            return Err(TradeError::NoUsablePrice {
                item: item.clone(),
                location: self.location_id.clone(),
            });
        }
        let free = self.free_storage();
        if quantity > free {
            return Err(TradeError::StorageFull {
                requested: quantity,
                free,
            });
        }
        self.pay(price * quantity)?;
        *self.inventory.entry(item.clone()).or_insert(0) += quantity;
        prices.record_purchase(item, quantity, price, &self.location_id);
        Ok(true)
    }

    pub fn upgrade(&mut self, config: &TradeConfig) -> Result<bool, TradeError> {
        if !self.is_active {
            return Ok(false);
        }
        if self.level >= config.shop_max_level {
            return Err(TradeError::MaxLevel(self.level));
        }
        self.pay(self.upgrade_cost(config))?;
        self.level += 1;
        self.storage_capacity = config.shop_storage_for_level(self.level);
        Ok(true)
    }

    pub fn hire(&mut self, employee: Employee, config: &TradeConfig) -> Result<bool, TradeError> {
        if employee.name.trim().is_empty() {
            return Err(TradeError::MissingId("employee"));
        }
        if !self.is_active {
            return Ok(false);
        }
        let max = self.staff_limit();
        if self.employees.len() >= max {
            return Err(TradeError::LimitReached {
                kind: "employee",
                max,
            });
        }
        self.pay(config.shop_hire_cost)?;
        self.employees.push(employee);
        Ok(true)
    }

    /// Let go of the first employee with this name.
    pub fn fire(&mut self, name: &str) -> bool {
        match self.employees.iter().position(|e| e.name == name) {
            Some(index) => {
                self.employees.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn set_profit_margin(&mut self, margin: f64) -> bool {
        if !margin.is_finite() {
            return false;
        }
        self.profit_margin = margin.clamp(0.0, 1.0);
        true
    }

    pub fn deposit(&mut self, amount: Denars) -> Result<bool, TradeError> {
        if amount <= 0 {
            return Err(TradeError::NonPositiveAmount(amount));
        }
        if !self.is_active {
            return Ok(false);
        }
        self.capital += amount;
        Ok(true)
    }

    pub fn withdraw(&mut self, amount: Denars) -> Result<bool, TradeError> {
        if amount <= 0 {
            return Err(TradeError::NonPositiveAmount(amount));
        }
        if !self.is_active {
            return Ok(false);
        }
        self.pay(amount)?;
        Ok(true)
    }

    fn pay(&mut self, amount: Denars) -> Result<(), TradeError> {
        if self.capital < amount {
            return Err(TradeError::InsufficientCapital {
                needed: amount,
                available: self.capital,
            });
        }
        self.capital -= amount;
        Ok(())
    }

    fn settle(&mut self, amount: f64) {
        self.unsettled += amount;
        let whole = self.unsettled.trunc();
        self.capital += whole as Denars;
        self.unsettled -= whole;
    }

    /// Sell a day's share of every line at a marked-up local price.
    fn sell(&mut self, days: f64, ctx: &mut TickContext<'_>) -> Denars {
        let turnover = self.turnover(ctx.config);
        let markup = 1.0 + self.profit_margin;
        let mut revenue = 0;
        for (item, qty) in self.inventory.iter_mut() {
            let Some(price) = ctx.env.usable_price(item, &self.location_id) else {
                continue;
            };
            let units = stochastic_round(*qty as f64 * turnover * days, ctx.rng).min(*qty);
            if units <= 0 {
                continue;
            }
            let sale_price = ((price as f64 * markup).round() as i64).max(1);
            *qty -= units;
            revenue += sale_price * units;
            ctx.prices
                .record_sale(item, units, sale_price, &self.location_id);
        }
        self.inventory.retain(|_, qty| *qty > 0);
        revenue
    }

    /// Clamp fields back into range after a restore.
    pub(crate) fn normalize(&mut self, config: &TradeConfig) {
        self.level = self.level.clamp(1, config.shop_max_level.max(1));
        self.storage_capacity = self.storage_capacity.max(config.shop_storage_for_level(self.level));
        self.profit_margin = if self.profit_margin.is_finite() {
            self.profit_margin.clamp(0.0, 1.0)
        } else {
            config.shop_default_margin
        };
        self.inventory.retain(|_, qty| *qty > 0);
        while self.stored_units() > self.storage_capacity {
            let excess = self.stored_units() - self.storage_capacity;
            let Some((_, qty)) = self.inventory.iter_mut().max_by_key(|(_, q)| **q) else {
                break;
            };
            *qty -= excess.min(*qty);
            self.inventory.retain(|_, q| *q > 0);
        }
        for employee in &mut self.employees {
            employee.skill = employee.skill.clamp(10, 100);
        }
        if !self.unsettled.is_finite() || self.unsettled.abs() >= 1.0 {
            self.unsettled = 0.0;
        }
    }
}

/// Round down, then round up with probability equal to the fraction.
fn stochastic_round(units: f64, rng: &mut dyn RngCore) -> Quantity {
    if units <= 0.0 {
        return 0;
    }
    let whole = units.floor();
    let extra = rng.random::<f64>() < units - whole;
    whole as Quantity + Quantity::from(extra)
}

impl Simulated for WholesaleShop {
    fn is_active(&self) -> bool {
        self.is_active
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        if !self.is_active {
            return;
        }
        let days = ctx.now.days_since(self.last_update);
        if days <= 0.0 {
            return;
        }
        self.last_update = ctx.now;

        for item in ctx.env.catalog.eligible_items() {
            if let Some(price) = ctx.env.usable_price(&item, &self.location_id) {
                ctx.prices.record_price(&item, &self.location_id, price, ctx.now);
            }
        }

        let revenue = self.sell(days, ctx);
        self.lifetime_sales += revenue;
        self.capital += revenue;

        let (lo, hi) = PROSPERITY_FACTOR_RANGE;
        let prosperity = ctx.env.world.prosperity(&self.location_id);
        let commission = ctx.config.shop_base_daily_income as f64
            * f64::from(self.level)
            * (prosperity / REFERENCE_PROSPERITY).clamp(lo, hi);
        let upkeep = (ctx.config.shop_upkeep_per_level * i64::from(self.level)) as f64;
        self.settle((commission - self.daily_wages() as f64 - upkeep) * days);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "shop",
            day = ctx.now.day_index(),
            shop = self.id.as_str(),
            location = self.location_id.as_str(),
            revenue = revenue,
            commission = commission * days,
            capital = self.capital,
            stored = self.stored_units(),
        );

        if self.capital < 0 {
            self.is_active = false;
            ctx.notify(
                &format!("Shop {} in {} has gone bankrupt", self.id, self.location_id),
                Severity::Critical,
            );
        }
    }
}
