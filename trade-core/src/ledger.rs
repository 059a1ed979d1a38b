//! The registry of every player-owned trading asset.
//!
//! The ledger owns shops, caravans, couriers and merchant relations keyed by
//! stable ids, together with the shared price tracker and random source. The
//! host calendar drives it through [`Ledger::advance_day`] and
//! [`Ledger::advance_hour`].

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tsify_next::Tsify;

use crate::agents::{Courier, PartyConfiguration, TradeCaravan, WholesaleShop};
use crate::config::TradeConfig;
use crate::error::TradeError;
use crate::external::Environment;
use crate::market::{ItemStats, PriceTracker, ProfitableRoute, TradeRoute};
use crate::relations::{MerchantRelation, TradeAgreement};
use crate::tick::{TickContext, tick_all};
use crate::types::{
    AgreementId, AgreementKind, CaravanId, CourierId, Denars, HeroId, ItemId, LocationId,
    MerchantId, Quantity, Severity, ShopId, Timestamp,
};

/// What one daily pass touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct DayReport {
    pub day: i64,
    pub shops_ticked: usize,
    pub caravans_ticked: usize,
    pub relations_updated: usize,
    pub agreements_expired: usize,
    pub price_points_pruned: usize,
}

pub struct Ledger {
    pub(crate) config: TradeConfig,
    pub(crate) shops: BTreeMap<ShopId, WholesaleShop>,
    pub(crate) caravans: BTreeMap<CaravanId, TradeCaravan>,
    pub(crate) couriers: BTreeMap<CourierId, Courier>,
    pub(crate) relations: BTreeMap<MerchantId, MerchantRelation>,
    pub(crate) prices: PriceTracker,
    pub(crate) rng: StdRng,
    /// Last id handed out; never reused.
    pub(crate) next_id: u64,
}

impl Ledger {
    /// Ledger with an OS-seeded random source.
    pub fn new(config: TradeConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic ledger for tests and replays.
    pub fn with_seed(config: TradeConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: TradeConfig, rng: StdRng) -> Self {
        Self {
            prices: PriceTracker::new(config.price_retention_days),
            config,
            shops: BTreeMap::new(),
            caravans: BTreeMap::new(),
            couriers: BTreeMap::new(),
            relations: BTreeMap::new(),
            rng,
            next_id: 0,
        }
    }

    fn issue_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:06}", self.next_id)
    }

    // === Accessors ===

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    pub fn prices(&self) -> &PriceTracker {
        &self.prices
    }

    pub fn shops(&self) -> impl Iterator<Item = &WholesaleShop> {
        self.shops.values()
    }

    pub fn caravans(&self) -> impl Iterator<Item = &TradeCaravan> {
        self.caravans.values()
    }

    pub fn couriers(&self) -> impl Iterator<Item = &Courier> {
        self.couriers.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = &MerchantRelation> {
        self.relations.values()
    }

    pub fn shop(&self, id: &ShopId) -> Option<&WholesaleShop> {
        self.shops.get(id)
    }

    pub fn caravan(&self, id: &CaravanId) -> Option<&TradeCaravan> {
        self.caravans.get(id)
    }

    pub fn courier(&self, id: &CourierId) -> Option<&Courier> {
        self.couriers.get(id)
    }

    pub fn relation(&self, merchant: &MerchantId) -> Option<&MerchantRelation> {
        self.relations.get(merchant)
    }

    pub fn shop_mut(&mut self, id: &ShopId) -> Result<&mut WholesaleShop, TradeError> {
        self.shops.get_mut(id).ok_or_else(|| unknown("shop", id.as_str()))
    }

    pub fn caravan_mut(&mut self, id: &CaravanId) -> Result<&mut TradeCaravan, TradeError> {
        self.caravans
            .get_mut(id)
            .ok_or_else(|| unknown("caravan", id.as_str()))
    }

    pub fn active_shop_count(&self) -> usize {
        self.shops.values().filter(|s| s.is_active).count()
    }

    pub fn active_caravan_count(&self) -> usize {
        self.caravans.values().filter(|c| c.is_active).count()
    }

    /// Couriers still waiting or on the road.
    pub fn active_courier_count(&self) -> usize {
        self.couriers
            .values()
            .filter(|c| !c.state.is_terminal())
            .count()
    }

    // === Shops ===

    /// Open a shop. The establishment cost comes out of the investment and the
    /// rest becomes working capital.
    pub fn create_shop(
        &mut self,
        location: LocationId,
        investment: Denars,
        env: &Environment<'_>,
    ) -> Result<ShopId, TradeError> {
        if location.is_blank() {
            return Err(TradeError::MissingId("location"));
        }
        if investment <= 0 {
            return Err(TradeError::NonPositiveAmount(investment));
        }
        if env.world.position(&location).is_none() {
            return Err(TradeError::UnknownLocation(location));
        }
        if self.active_shop_count() >= self.config.max_shops {
            return Err(TradeError::LimitReached {
                kind: "shop",
                max: self.config.max_shops,
            });
        }
        if self
            .shops
            .values()
            .any(|s| s.is_active && s.location_id == location)
        {
            return Err(TradeError::ShopAlreadyExists(location));
        }
        if investment < self.config.shop_establish_cost {
            return Err(TradeError::InsufficientCapital {
                needed: self.config.shop_establish_cost,
                available: investment,
            });
        }

        let id = ShopId::new(self.issue_id("shop"));
        let shop = WholesaleShop::new(
            id.clone(),
            location,
            investment - self.config.shop_establish_cost,
            env.now(),
            &self.config,
        );

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "ledger",
            day = env.now().day_index(),
            event = "create_shop",
            id = id.as_str(),
            location = shop.location_id.as_str(),
            capital = shop.capital,
        );

        self.shops.insert(id.clone(), shop);
        Ok(id)
    }

    /// Buy inventory for a shop, recording the purchase in the shared tracker.
    pub fn stock_shop(
        &mut self,
        id: &ShopId,
        item: &ItemId,
        quantity: Quantity,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        let shop = self.shops.get_mut(id).ok_or_else(|| unknown("shop", id.as_str()))?;
        shop.stock_item(item, quantity, env.oracle, &mut self.prices)
    }

    // === Caravans ===

    pub fn create_caravan(
        &mut self,
        leader: HeroId,
        home: LocationId,
        capital: Denars,
        env: &Environment<'_>,
    ) -> Result<CaravanId, TradeError> {
        if leader.is_blank() {
            return Err(TradeError::MissingId("leader"));
        }
        if home.is_blank() {
            return Err(TradeError::MissingId("home location"));
        }
        if capital <= 0 {
            return Err(TradeError::NonPositiveAmount(capital));
        }
        if env.world.position(&home).is_none() {
            return Err(TradeError::UnknownLocation(home));
        }
        if self.active_caravan_count() >= self.config.max_caravans {
            return Err(TradeError::LimitReached {
                kind: "caravan",
                max: self.config.max_caravans,
            });
        }

        let id = CaravanId::new(self.issue_id("caravan"));
        let caravan = TradeCaravan::new(id.clone(), leader, home, capital, env.now(), &self.config);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "ledger",
            day = env.now().day_index(),
            event = "create_caravan",
            id = id.as_str(),
            location = caravan.home_location_id.as_str(),
            capital = caravan.capital,
        );

        self.caravans.insert(id.clone(), caravan);
        Ok(id)
    }

    pub fn send_caravan(
        &mut self,
        id: &CaravanId,
        destination: LocationId,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        self.caravan_mut(id)?.send_to(destination, env.world)
    }

    pub fn assign_route(
        &mut self,
        id: &CaravanId,
        route: TradeRoute,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        self.caravan_mut(id)?.follow_route(route, env.world)
    }

    pub fn upgrade_caravan_security(&mut self, id: &CaravanId) -> Result<bool, TradeError> {
        let caravan = self
            .caravans
            .get_mut(id)
            .ok_or_else(|| unknown("caravan", id.as_str()))?;
        caravan.upgrade_security(&self.config)
    }

    pub fn upgrade_caravan_cargo(&mut self, id: &CaravanId) -> Result<bool, TradeError> {
        let caravan = self
            .caravans
            .get_mut(id)
            .ok_or_else(|| unknown("caravan", id.as_str()))?;
        caravan.upgrade_cargo_capacity(&self.config)
    }

    pub fn party_configuration(&self, id: &CaravanId) -> Option<PartyConfiguration> {
        self.caravans.get(id).map(TradeCaravan::party_configuration)
    }

    /// Plan a route at the caravan's pace, with a profit estimate for a full hold.
    pub fn plan_route(
        &self,
        caravan: &CaravanId,
        waypoints: Vec<LocationId>,
        is_circular: bool,
        env: &Environment<'_>,
    ) -> Result<TradeRoute, TradeError> {
        let caravan = self
            .caravans
            .get(caravan)
            .ok_or_else(|| unknown("caravan", caravan.as_str()))?;
        Ok(
            TradeRoute::plan(waypoints, is_circular, env.world, caravan.speed)?
                .with_expected_profit(&self.prices, env.now(), caravan.cargo_capacity),
        )
    }

    // === Couriers ===

    pub fn hire_courier(
        &mut self,
        origin: LocationId,
        destination: LocationId,
        skill: u32,
        env: &Environment<'_>,
    ) -> Result<CourierId, TradeError> {
        if origin.is_blank() {
            return Err(TradeError::MissingId("origin"));
        }
        if destination.is_blank() {
            return Err(TradeError::MissingId("destination"));
        }
        if self.active_courier_count() >= self.config.max_couriers {
            return Err(TradeError::LimitReached {
                kind: "courier",
                max: self.config.max_couriers,
            });
        }
        let distance = match env.distance(&origin, &destination) {
            Some(d) => d,
            None if env.world.position(&origin).is_none() => {
                return Err(TradeError::UnknownLocation(origin));
            }
            None => return Err(TradeError::UnknownLocation(destination)),
        };

        let id = CourierId::new(self.issue_id("courier"));
        let courier = Courier::new(id.clone(), origin, destination, distance, skill, &self.config);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "ledger",
            day = env.now().day_index(),
            event = "hire_courier",
            id = id.as_str(),
            location = courier.destination_location_id.as_str(),
            capital = courier.cost,
        );

        self.couriers.insert(id.clone(), courier);
        Ok(id)
    }

    pub fn dispatch_courier(&mut self, id: &CourierId, env: &Environment<'_>) -> Result<bool, TradeError> {
        let courier = self
            .couriers
            .get_mut(id)
            .ok_or_else(|| unknown("courier", id.as_str()))?;
        Ok(courier.dispatch(env.now()))
    }

    /// Prices brought back by the most recently returned courier for a place.
    pub fn latest_courier_report(&self, destination: &LocationId) -> BTreeMap<ItemId, i64> {
        self.couriers
            .values()
            .filter(|c| c.has_returned_info && c.destination_location_id == *destination)
            .filter_map(|c| c.delivered_at.map(|at| (at, c)))
            .max_by(|a, b| a.0.0.total_cmp(&b.0.0))
            .map(|(_, c)| c.price_info.clone())
            .unwrap_or_default()
    }

    // === Merchant relations ===

    /// Relation with a merchant, created on first contact.
    fn relation_entry(&mut self, merchant: &MerchantId, now: Timestamp) -> &mut MerchantRelation {
        let config = &self.config;
        self.relations
            .entry(merchant.clone())
            .or_insert_with(|| MerchantRelation::new(merchant.clone(), now, config))
    }

    pub fn visit_merchant(&mut self, merchant: &MerchantId, env: &Environment<'_>) -> Result<(), TradeError> {
        if merchant.is_blank() {
            return Err(TradeError::MissingId("merchant"));
        }
        let now = env.now();
        self.relation_entry(merchant, now).visit(now);
        Ok(())
    }

    pub fn record_merchant_trade(
        &mut self,
        merchant: &MerchantId,
        value: Denars,
        succeeded: bool,
        env: &Environment<'_>,
    ) -> Result<(), TradeError> {
        if merchant.is_blank() {
            return Err(TradeError::MissingId("merchant"));
        }
        if value <= 0 {
            return Err(TradeError::NonPositiveAmount(value));
        }
        let now = env.now();
        let config = self.config.clone();
        let relation = self.relation_entry(merchant, now);
        if succeeded {
            relation.record_successful_trade(value, now, &config);
        } else {
            relation.record_failed_trade(value, now);
        }
        Ok(())
    }

    /// Offer an agreement to a merchant at a trust-adjusted price.
    #[allow(clippy::too_many_arguments)]
    pub fn propose_agreement(
        &mut self,
        merchant: &MerchantId,
        kind: AgreementKind,
        item: ItemId,
        quantity: Quantity,
        base_price: i64,
        duration_days: f64,
        env: &Environment<'_>,
    ) -> Result<AgreementId, TradeError> {
        if merchant.is_blank() {
            return Err(TradeError::MissingId("merchant"));
        }
        if !env.world.is_merchant_available(merchant) {
            return Err(TradeError::AgreementNotAllowed);
        }
        let now = env.now();
        // Validate before spending an id.
        TradeAgreement::new(
            AgreementId::new(""),
            merchant.clone(),
            kind,
            item.clone(),
            quantity,
            base_price,
            now,
            duration_days,
        )?;
        let config = self.config.clone();
        if !self.relation_entry(merchant, now).can_make_agreement(&config) {
            return Err(TradeError::AgreementNotAllowed);
        }
        let id = AgreementId::new(self.issue_id("agreement"));
        self.relation_entry(merchant, now).create_agreement(
            id.clone(),
            kind,
            item,
            quantity,
            base_price,
            duration_days,
            now,
            &config,
        )?;
        Ok(id)
    }

    /// Deliver against an agreement; accepted deliveries build trust.
    pub fn fulfill_agreement(
        &mut self,
        merchant: &MerchantId,
        agreement: &AgreementId,
        amount: Quantity,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        let relation = self
            .relations
            .get_mut(merchant)
            .ok_or_else(|| unknown("merchant", merchant.as_str()))?;
        relation.record_agreement_transaction(agreement, amount, env.now(), &self.config)
    }

    pub fn extend_agreement(
        &mut self,
        merchant: &MerchantId,
        agreement: &AgreementId,
        days: f64,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        match self.agreement_mut(merchant, agreement)? {
            Some(a) => a.extend_duration(days, env.now()),
            None => Ok(false),
        }
    }

    pub fn increase_agreement(
        &mut self,
        merchant: &MerchantId,
        agreement: &AgreementId,
        amount: Quantity,
        env: &Environment<'_>,
    ) -> Result<bool, TradeError> {
        match self.agreement_mut(merchant, agreement)? {
            Some(a) => a.increase_quantity(amount, env.now()),
            None => Ok(false),
        }
    }

    /// `None` while the merchant's relation is frozen.
    fn agreement_mut(
        &mut self,
        merchant: &MerchantId,
        agreement: &AgreementId,
    ) -> Result<Option<&mut TradeAgreement>, TradeError> {
        let relation = self
            .relations
            .get_mut(merchant)
            .ok_or_else(|| unknown("merchant", merchant.as_str()))?;
        let is_active = relation.is_active;
        let agreement = relation
            .agreements
            .get_mut(agreement)
            .ok_or_else(|| unknown("agreement", agreement.as_str()))?;
        Ok(is_active.then_some(agreement))
    }

    // === Deactivation ===

    /// Close a shop for good. Already closed shops are left alone.
    pub fn deactivate_shop(&mut self, id: &ShopId) -> Result<bool, TradeError> {
        let shop = self.shop_mut(id)?;
        Ok(std::mem::replace(&mut shop.is_active, false))
    }

    pub fn deactivate_caravan(&mut self, id: &CaravanId) -> Result<bool, TradeError> {
        let caravan = self.caravan_mut(id)?;
        Ok(std::mem::replace(&mut caravan.is_active, false))
    }

    // === Analytics ===

    pub fn item_stats(&self, item: &ItemId) -> Option<&ItemStats> {
        self.prices.item_stats(item)
    }

    pub fn profitable_routes(&self, top_n: usize, now: Timestamp) -> Vec<ProfitableRoute> {
        self.prices.profitable_routes(top_n, now)
    }

    pub fn forecast(&mut self, item: &ItemId, location: &LocationId, days_ahead: f64, now: Timestamp) -> i64 {
        self.prices
            .forecast(item, location, days_ahead, now, &mut self.rng)
    }

    pub fn record_price(&mut self, item: &ItemId, location: &LocationId, price: i64, now: Timestamp) -> bool {
        self.prices.record_price(item, location, price, now)
    }

    // === Scheduling ===

    /// Daily pass: shops, caravans, merchant relations, then price pruning.
    pub fn advance_day(&mut self, env: &Environment<'_>) -> DayReport {
        let now = env.now();
        let mut ctx = TickContext {
            now,
            config: &self.config,
            env: *env,
            prices: &mut self.prices,
            rng: &mut self.rng,
        };
        let shops_ticked = tick_all(self.shops.values_mut(), &mut ctx);
        let caravans_ticked = tick_all(self.caravans.values_mut(), &mut ctx);

        let mut agreements_expired = 0;
        for relation in self.relations.values_mut() {
            let available = env.world.is_merchant_available(&relation.merchant_id);
            let outcome = relation.update(now, available, &self.config);
            agreements_expired += outcome.expired;
            if outcome.deactivated {
                env.notifier.notify(
                    &format!(
                        "Merchant {} is gone; their agreements are void",
                        relation.merchant_id
                    ),
                    Severity::Warning,
                );
            }
        }

        let report = DayReport {
            day: now.day_index(),
            shops_ticked,
            caravans_ticked,
            relations_updated: self.relations.len(),
            agreements_expired,
            price_points_pruned: self.prices.update(now),
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "ledger",
            day = report.day,
            event = "advance_day",
            shops = report.shops_ticked,
            caravans = report.caravans_ticked,
            expired = report.agreements_expired,
            pruned = report.price_points_pruned,
        );

        report
    }

    /// Hourly pass: couriers only.
    pub fn advance_hour(&mut self, env: &Environment<'_>) -> usize {
        let mut ctx = TickContext {
            now: env.now(),
            config: &self.config,
            env: *env,
            prices: &mut self.prices,
            rng: &mut self.rng,
        };
        tick_all(self.couriers.values_mut(), &mut ctx)
    }
}

fn unknown(kind: &'static str, id: &str) -> TradeError {
    TradeError::UnknownEntity {
        kind,
        id: id.to_string(),
    }
}
