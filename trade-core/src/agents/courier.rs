//! Information couriers.
//!
//! A courier rides to a destination, spends a fixed half day collecting
//! prices, and rides back. Phase boundaries are anchored in game time rather
//! than tick count, so a restored courier (or one ticked coarsely) finishes at
//! exactly the same instant as one ticked every hour.

use std::collections::BTreeMap;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::config::TradeConfig;
use crate::tick::{Simulated, TickContext};
use crate::types::{
    CourierId, CourierState, Denars, HOURS_PER_DAY, ItemId, LocationId, Severity, Timestamp,
};

// === JOURNEY CONSTANTS ===

/// Map units per league.
pub const DISTANCE_SCALE: f64 = 100.0;
/// Leagues a courier covers per day.
pub const COURIER_SPEED: f64 = 20.0;
pub const GATHERING_HOURS: f64 = 12.0;
pub const MIN_SKILL: u32 = 10;
pub const MAX_SKILL: u32 = 100;

const BASE_DAILY_RISK: f64 = 0.01;
/// Fraction of the base risk a perfectly skilled courier avoids.
const SKILL_RISK_REDUCTION: f64 = 0.8;
/// Width of the price noise band for an unskilled courier.
const MAX_NOISE_RANGE: f64 = 0.4;
const SKILL_COST_FACTOR: f64 = 1.5;

/// Hours for a one-way ride over a straight-line distance.
pub fn one_way_hours(distance: f64) -> f64 {
    distance.max(0.0) * HOURS_PER_DAY / (DISTANCE_SCALE * COURIER_SPEED)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Courier {
    pub id: CourierId,
    pub origin_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub state: CourierState,
    pub departure_time: Option<Timestamp>,
    pub expected_return_time: Option<Timestamp>,
    pub price_info: BTreeMap<ItemId, i64>,
    pub skill: u32,
    pub journey_progress: f64,
    pub has_returned_info: bool,
    pub cost: Denars,
    pub distance: f64,
    pub one_way_hours: f64,
    /// Game time at which the current phase began.
    pub phase_started_at: Timestamp,
    pub last_tick: Timestamp,
    pub delivered_at: Option<Timestamp>,
}

impl Courier {
    pub fn new(
        id: CourierId,
        origin: LocationId,
        destination: LocationId,
        distance: f64,
        skill: u32,
        config: &TradeConfig,
    ) -> Self {
        let skill = skill.clamp(MIN_SKILL, MAX_SKILL);
        let cost = config.courier_base_cost as f64
            + distance * config.courier_distance_multiplier
            + skill as f64 * SKILL_COST_FACTOR;
        Self {
            id,
            origin_location_id: origin,
            destination_location_id: destination,
            state: CourierState::Ready,
            departure_time: None,
            expected_return_time: None,
            price_info: BTreeMap::new(),
            skill,
            journey_progress: 0.0,
            has_returned_info: false,
            cost: cost.round() as Denars,
            distance,
            one_way_hours: one_way_hours(distance),
            phase_started_at: Timestamp::ZERO,
            last_tick: Timestamp::ZERO,
            delivered_at: None,
        }
    }

    /// Send the courier on its way. Only a ready courier can be dispatched;
    /// anything else is ignored.
    pub fn dispatch(&mut self, now: Timestamp) -> bool {
        if self.state != CourierState::Ready {
            return false;
        }
        self.state = CourierState::Traveling;
        self.departure_time = Some(now);
        self.expected_return_time = Some(now.add_hours(2.0 * self.one_way_hours + GATHERING_HOURS));
        self.phase_started_at = now;
        self.last_tick = now;
        self.journey_progress = 0.0;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "courier",
            hour = now.hours(),
            courier = self.id.as_str(),
            destination = self.destination_location_id.as_str(),
            event = "dispatched",
            one_way_hours = self.one_way_hours,
        );
        true
    }

    /// Chance per day of never coming back.
    pub fn daily_loss_risk(&self, config: &TradeConfig) -> f64 {
        BASE_DAILY_RISK
            * config.courier_risk_factor
            * (1.0 - self.skill as f64 / 100.0 * SKILL_RISK_REDUCTION)
    }

    /// Relative width of the noise applied to gathered prices.
    pub fn noise_range(&self) -> f64 {
        MAX_NOISE_RANGE * (1.0 - self.skill as f64 / 100.0)
    }

    fn phase_hours(&self) -> Option<f64> {
        match self.state {
            CourierState::Traveling | CourierState::Returning => Some(self.one_way_hours),
            CourierState::Gathering => Some(GATHERING_HOURS),
            CourierState::Ready | CourierState::Delivered | CourierState::Lost => None,
        }
    }

    fn lose(&mut self, ctx: &TickContext<'_>) {
        self.state = CourierState::Lost;
        self.has_returned_info = false;
        self.price_info.clear();
        ctx.notify(
            &format!(
                "Courier {} sent to {} has gone missing",
                self.id, self.destination_location_id
            ),
            Severity::Warning,
        );
    }

    /// Noisy copy of the destination's spot prices.
    fn gather_prices(&mut self, ctx: &mut TickContext<'_>) {
        let range = self.noise_range();
        let mut gathered = BTreeMap::new();
        for item in ctx.env.catalog.eligible_items() {
            let Some(price) = ctx.env.usable_price(&item, &self.destination_location_id) else {
                continue;
            };
            let noise = 1.0 + (ctx.rng.random::<f64>() - 0.5) * range;
            let observed = (price as f64 * noise).round() as i64;
            gathered.insert(item, observed.max(1));
        }
        self.price_info = gathered;
    }

    /// Move to the next phase. The new phase starts when the old one ended.
    fn complete_phase(&mut self, ctx: &mut TickContext<'_>) {
        let Some(hours) = self.phase_hours() else {
            return;
        };
        let ended_at = self.phase_started_at.add_hours(hours);
        match self.state {
            CourierState::Traveling => {
                self.state = CourierState::Gathering;
                self.journey_progress = 0.0;
            }
            CourierState::Gathering => {
                self.gather_prices(ctx);
                self.state = CourierState::Returning;
                self.journey_progress = 0.0;
            }
            CourierState::Returning => {
                self.state = CourierState::Delivered;
                self.journey_progress = 1.0;
                self.has_returned_info = true;
                self.delivered_at = Some(ended_at);
                ctx.notify(
                    &format!(
                        "Courier {} is back with {} prices from {}",
                        self.id,
                        self.price_info.len(),
                        self.destination_location_id
                    ),
                    Severity::Info,
                );
            }
            CourierState::Ready | CourierState::Delivered | CourierState::Lost => return,
        }
        self.phase_started_at = ended_at;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "courier",
            hour = ended_at.hours(),
            courier = self.id.as_str(),
            destination = self.destination_location_id.as_str(),
            event = "phase",
            state = ?self.state,
        );
    }

    /// Clamp fields back into range after a restore.
    pub(crate) fn normalize(&mut self) {
        self.skill = self.skill.clamp(MIN_SKILL, MAX_SKILL);
        self.journey_progress = self.journey_progress.clamp(0.0, 1.0);
        self.one_way_hours = self.one_way_hours.max(0.0);
        if !self.state.is_terminal() || self.state == CourierState::Lost {
            self.has_returned_info = false;
        }
        if self.state == CourierState::Delivered {
            self.has_returned_info = true;
        }
        self.price_info.retain(|_, price| *price > 0);
    }
}

impl Simulated for Courier {
    fn is_active(&self) -> bool {
        self.state.is_underway()
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) {
        if !self.state.is_underway() {
            return;
        }
        let now = ctx.now;
        let elapsed_hours = now.hours_since(self.last_tick);
        if elapsed_hours > 0.0 {
            self.last_tick = now;
            let risk = self.daily_loss_risk(ctx.config) * elapsed_hours / HOURS_PER_DAY;
            if roll(ctx.rng) < risk {
                self.lose(ctx);
                #[cfg(feature = "instrument")]
                tracing::info!(
                    target: "courier",
                    hour = now.hours(),
                    courier = self.id.as_str(),
                    destination = self.destination_location_id.as_str(),
                    event = "lost",
                );
                return;
            }
        }

        // Catch up through every phase that has already ended.
        while let Some(hours) = self.phase_hours() {
            let ends_at = self.phase_started_at.add_hours(hours);
            if hours > 0.0 && now < ends_at {
                let in_phase = now.hours_since(self.phase_started_at);
                self.journey_progress = (in_phase / hours).clamp(0.0, 1.0);
                break;
            }
            self.complete_phase(ctx);
        }
    }
}

fn roll(rng: &mut dyn RngCore) -> f64 {
    rng.random::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::harness::Harness;
    use crate::world::StaticWorld;

    fn harness() -> Harness {
        let world = StaticWorld::new()
            .with_location("home", (0.0, 0.0), 3000.0)
            .with_location("far", (600.0, 0.0), 3000.0)
            .with_item("grain")
            .with_item("salt")
            .with_price("far", "grain", 20)
            .with_price("far", "salt", 50);
        let config = TradeConfig {
            courier_risk_factor: 0.0,
            ..TradeConfig::default()
        };
        Harness::new(world, config, 11)
    }

    fn courier(skill: u32, config: &TradeConfig) -> Courier {
        Courier::new(
            CourierId::from("courier-000001"),
            LocationId::from("home"),
            LocationId::from("far"),
            600.0,
            skill,
            config,
        )
    }

    #[test]
    fn cost_is_fixed_at_creation() {
        let config = TradeConfig::default();
        let c = courier(100, &config);
        // 100 + 600 * 0.5 + 100 * 1.5
        assert_eq!(c.cost, 550);
    }

    #[test]
    fn skill_is_clamped() {
        let config = TradeConfig::default();
        assert_eq!(courier(0, &config).skill, MIN_SKILL);
        assert_eq!(courier(500, &config).skill, MAX_SKILL);
    }

    #[test]
    fn dispatch_only_from_ready() {
        let config = TradeConfig::default();
        let mut c = courier(50, &config);
        assert!(c.dispatch(Timestamp::from_hours(10.0)));
        assert!(!c.dispatch(Timestamp::from_hours(11.0)));
        assert_eq!(c.departure_time, Some(Timestamp::from_hours(10.0)));
    }

    #[test]
    fn expected_return_covers_round_trip() {
        let config = TradeConfig::default();
        let mut c = courier(100, &config);
        c.dispatch(Timestamp::ZERO);
        let expected = c.expected_return_time.unwrap().hours();
        assert!((expected - 26.4).abs() < 1e-9, "expected = {expected}");
    }

    #[test]
    fn journey_timeline_matches_distance() {
        let mut fx = harness();
        let mut c = courier(100, &fx.config);
        assert_eq!(c.one_way_hours, 7.2);
        c.dispatch(Timestamp::ZERO);

        fx.tick_at(&mut c, 3.6);
        assert_eq!(c.state, CourierState::Traveling);
        assert!((c.journey_progress - 0.5).abs() < 1e-9);

        fx.tick_at(&mut c, 7.2);
        assert_eq!(c.state, CourierState::Gathering);
        assert_eq!(c.journey_progress, 0.0);

        let gathered_at = 7.2 + GATHERING_HOURS;
        assert!((gathered_at - 19.2).abs() < 1e-9);
        fx.tick_at(&mut c, gathered_at - 1.0);
        assert_eq!(c.state, CourierState::Gathering);
        fx.tick_at(&mut c, gathered_at);
        assert_eq!(c.state, CourierState::Returning);
        assert_eq!(c.journey_progress, 0.0);
        assert_eq!(c.price_info.len(), 2);

        fx.tick_at(&mut c, 26.0);
        assert_eq!(c.state, CourierState::Returning);

        let back_at = gathered_at + 7.2;
        assert!((back_at - 26.4).abs() < 1e-9);
        fx.tick_at(&mut c, back_at);
        assert_eq!(c.state, CourierState::Delivered);
        assert!(c.has_returned_info);
    }

    #[test]
    fn progress_is_monotonic_within_a_phase() {
        let mut fx = harness();
        let mut c = courier(100, &fx.config);
        c.dispatch(Timestamp::ZERO);
        let mut last = (c.state, c.journey_progress);
        for step in 1..=60 {
            fx.tick_at(&mut c, step as f64 * 0.5);
            if c.state == last.0 {
                assert!(c.journey_progress >= last.1);
            } else if c.state.is_underway() {
                assert!(c.journey_progress < 0.5);
            }
            last = (c.state, c.journey_progress);
        }
        assert_eq!(c.state, CourierState::Delivered);
    }

    #[test]
    fn coarse_tick_catches_up() {
        let mut fx = harness();
        let mut c = courier(100, &fx.config);
        c.dispatch(Timestamp::ZERO);
        fx.tick_at(&mut c, 48.0);
        assert_eq!(c.state, CourierState::Delivered);
        let delivered = c.delivered_at.unwrap().hours();
        assert!((delivered - 26.4).abs() < 1e-9);
    }

    #[test]
    fn master_courier_reports_exact_prices() {
        let mut fx = harness();
        let mut c = courier(100, &fx.config);
        c.dispatch(Timestamp::ZERO);
        fx.tick_at(&mut c, 30.0);
        assert_eq!(c.price_info.get(&ItemId::from("grain")), Some(&20));
        assert_eq!(c.price_info.get(&ItemId::from("salt")), Some(&50));
    }

    #[test]
    fn novice_prices_stay_within_noise_band() {
        let mut fx = harness();
        let mut c = courier(10, &fx.config);
        c.dispatch(Timestamp::ZERO);
        fx.tick_at(&mut c, 1000.0);
        let half_band = c.noise_range() / 2.0;
        let salt = *c.price_info.get(&ItemId::from("salt")).unwrap() as f64;
        assert!(salt >= (50.0 * (1.0 - half_band)).floor());
        assert!(salt <= (50.0 * (1.0 + half_band)).ceil());
    }

    #[test]
    fn certain_loss_is_terminal() {
        let mut fx = harness();
        fx.config.courier_risk_factor = 1_000_000.0;
        let mut c = courier(10, &fx.config);
        c.dispatch(Timestamp::ZERO);
        fx.tick_at(&mut c, 5.0);
        assert_eq!(c.state, CourierState::Lost);
        assert!(c.price_info.is_empty());
        assert!(!c.has_returned_info);
        assert_eq!(fx.log.count_matching("missing"), 1);

        fx.tick_at(&mut c, 100.0);
        assert_eq!(c.state, CourierState::Lost);
    }

    #[test]
    fn ready_courier_ignores_ticks() {
        let mut fx = harness();
        let mut c = courier(50, &fx.config);
        fx.tick_at(&mut c, 10.0);
        assert_eq!(c.state, CourierState::Ready);
        assert_eq!(c.journey_progress, 0.0);
    }

    #[test]
    fn risk_falls_with_skill() {
        let config = TradeConfig::default();
        let novice = courier(10, &config).daily_loss_risk(&config);
        let master = courier(100, &config).daily_loss_risk(&config);
        assert!((master - 0.002).abs() < 1e-12);
        assert!(novice > master);
    }
}
