use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tsify_next::Tsify;

use crate::ledger::Ledger;
use crate::types::{Denars, ItemId, Quantity, Timestamp};

/// Portfolio-wide stock snapshot captured at a day boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct PortfolioSnapshot {
    pub day: i64,
    pub shop_capital: Denars,
    pub caravan_capital: Denars,
    /// Shop inventory plus caravan cargo, by item.
    pub goods: BTreeMap<ItemId, Quantity>,
    pub shop_sales: Denars,
    pub trade_profit: Denars,
    pub courier_spend: Denars,
    pub agreement_volume: Denars,
    pub active_shops: usize,
    pub active_caravans: usize,
    pub live_couriers: usize,
}

impl PortfolioSnapshot {
    pub fn total_capital(&self) -> Denars {
        self.shop_capital + self.caravan_capital
    }
}

/// Per-day change between two portfolio snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct DayFlow {
    pub day: i64,
    pub capital_before: Denars,
    pub capital_after: Denars,
    pub capital_delta: Denars,
    pub shop_capital_delta: Denars,
    pub caravan_capital_delta: Denars,
    pub shop_sales_delta: Denars,
    pub trade_profit_delta: Denars,
    /// Shop capital change not explained by sales: commission, wages, upkeep, stocking.
    pub shop_operating_delta: Denars,
    pub courier_spend_delta: Denars,
    pub agreement_volume_delta: Denars,
    pub goods_delta: BTreeMap<ItemId, Quantity>,
    pub active_shops_delta: i64,
    pub active_caravans_delta: i64,
}

/// Capture the current portfolio snapshot.
pub fn capture_portfolio(ledger: &Ledger, now: Timestamp) -> PortfolioSnapshot {
    let mut goods: BTreeMap<ItemId, Quantity> = BTreeMap::new();
    for shop in ledger.shops() {
        for (item, qty) in &shop.inventory {
            *goods.entry(item.clone()).or_insert(0) += qty;
        }
    }
    for caravan in ledger.caravans() {
        for (item, qty) in &caravan.cargo {
            *goods.entry(item.clone()).or_insert(0) += qty;
        }
    }

    PortfolioSnapshot {
        day: now.day_index(),
        shop_capital: ledger.shops().map(|s| s.capital).sum(),
        caravan_capital: ledger.caravans().map(|c| c.capital).sum(),
        goods,
        shop_sales: ledger.shops().map(|s| s.lifetime_sales).sum(),
        trade_profit: ledger.caravans().map(|c| c.lifetime_profit).sum(),
        courier_spend: ledger.couriers().map(|c| c.cost).sum(),
        agreement_volume: ledger.relations().map(|r| r.total_volume).sum(),
        active_shops: ledger.active_shop_count(),
        active_caravans: ledger.active_caravan_count(),
        live_couriers: ledger.active_courier_count(),
    }
}

/// Decompose one day's changes using boundary snapshots.
pub fn decompose_day(before: &PortfolioSnapshot, after: &PortfolioSnapshot) -> DayFlow {
    let shop_capital_delta = after.shop_capital - before.shop_capital;
    let shop_sales_delta = after.shop_sales - before.shop_sales;

    let keys: BTreeSet<&ItemId> = before.goods.keys().chain(after.goods.keys()).collect();
    let goods_delta = keys
        .into_iter()
        .map(|item| {
            let after_qty = after.goods.get(item).copied().unwrap_or(0);
            let before_qty = before.goods.get(item).copied().unwrap_or(0);
            (item.clone(), after_qty - before_qty)
        })
        .filter(|(_, delta)| *delta != 0)
        .collect();

    DayFlow {
        day: after.day,
        capital_before: before.total_capital(),
        capital_after: after.total_capital(),
        capital_delta: after.total_capital() - before.total_capital(),
        shop_capital_delta,
        caravan_capital_delta: after.caravan_capital - before.caravan_capital,
        shop_sales_delta,
        trade_profit_delta: after.trade_profit - before.trade_profit,
        shop_operating_delta: shop_capital_delta - shop_sales_delta,
        courier_spend_delta: after.courier_spend - before.courier_spend,
        agreement_volume_delta: after.agreement_volume - before.agreement_volume,
        goods_delta,
        active_shops_delta: after.active_shops as i64 - before.active_shops as i64,
        active_caravans_delta: after.active_caravans as i64 - before.active_caravans as i64,
    }
}
