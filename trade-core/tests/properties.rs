//! Invariants that must hold for any sequence of commands and ticks.
//!
//! Each test drives the public API with a seeded random command stream and
//! checks bounds after every step.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trade_core::{
    AgreementId, AgreementKind, CourierState, Environment, ItemId, Ledger, LocationId,
    MAX_TRUST, MIN_TRUST, ManualClock, MerchantId, MerchantRelation, NotificationLog,
    PriceTracker, StaticWorld, Timestamp, TradeAgreement, TradeConfig, TradeError,
};

// === TEST FIXTURES ===

const SEEDS: [u64; 4] = [3, 7, 19, 2026];

struct Host {
    world: StaticWorld,
    clock: ManualClock,
    log: NotificationLog,
}

impl Host {
    fn new(world: StaticWorld) -> Self {
        Self {
            world,
            clock: ManualClock::default(),
            log: NotificationLog::new(),
        }
    }

    fn env(&self) -> Environment<'_> {
        Environment {
            clock: &self.clock,
            oracle: &self.world,
            catalog: &self.world,
            world: &self.world,
            notifier: &self.log,
        }
    }
}

/// Three towns in a line with diverging prices for two goods.
fn valley() -> StaticWorld {
    StaticWorld::new()
        .with_location("mill", (0.0, 0.0), 3000.0)
        .with_location("ford", (300.0, 0.0), 6000.0)
        .with_location("keep", (900.0, 0.0), 9000.0)
        .with_item("grain")
        .with_item("iron")
        .with_price("mill", "grain", 8)
        .with_price("ford", "grain", 12)
        .with_price("keep", "grain", 20)
        .with_price("mill", "iron", 90)
        .with_price("ford", "iron", 70)
        .with_price("keep", "iron", 60)
}

// === TRUST ===

#[test]
fn trust_stays_in_bounds() {
    let config = TradeConfig::default();
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut relation = MerchantRelation::new(MerchantId::from("m"), Timestamp::ZERO, &config);
        let mut now = Timestamp::ZERO;
        for _ in 0..500 {
            now = now.add_days(rng.random::<f64>() * 5.0);
            let value = rng.random_range(1..5_000);
            match rng.random_range(0..4) {
                0 => relation.record_successful_trade(value, now, &config),
                1 => relation.record_failed_trade(value, now),
                2 => relation.improve_trust(rng.random::<f64>() * 40.0),
                _ => {
                    relation.update(now, true, &config);
                }
            }
            assert!(
                (MIN_TRUST..=MAX_TRUST).contains(&relation.trust),
                "seed {seed}: trust {} out of bounds",
                relation.trust
            );
        }
    }
}

// === AGREEMENTS ===

#[test]
fn remaining_quantity_never_leaves_its_range() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut agreement = TradeAgreement::new(
            AgreementId::from("agreement-000001"),
            MerchantId::from("m"),
            AgreementKind::Sell,
            ItemId::from("grain"),
            200,
            10,
            Timestamp::ZERO,
            30.0,
        )
        .unwrap();
        let mut now = Timestamp::ZERO;
        for _ in 0..200 {
            now = now.add_hours(rng.random::<f64>() * 6.0);
            let amount = rng.random_range(1..60);
            match agreement.record_transaction(amount, now) {
                Ok(_) => {}
                Err(TradeError::TransactionRejected { requested, remaining }) => {
                    assert!(requested > remaining);
                }
                Err(other) => panic!("unexpected error {other}"),
            }
            if rng.random_range(0..10) == 0 {
                agreement.increase_quantity(rng.random_range(1..30), now).unwrap();
            }
            assert!(agreement.remaining_quantity >= 0);
            assert!(agreement.remaining_quantity <= agreement.quantity);
            assert_eq!(agreement.is_fulfilled, agreement.remaining_quantity == 0);
        }
    }
}

// === COURIERS ===

#[test]
fn courier_progress_never_rewinds_within_a_phase() {
    for seed in SEEDS {
        let host = Host::new(valley());
        let env = host.env();
        let config = TradeConfig {
            courier_risk_factor: 20.0,
            ..TradeConfig::default()
        };
        let mut ledger = Ledger::with_seed(config, seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let id = ledger
            .hire_courier("mill".into(), "keep".into(), rng.random_range(10..=100), &env)
            .unwrap();
        ledger.dispatch_courier(&id, &env).unwrap();

        let mut last = (CourierState::Traveling, 0.0);
        let mut terminal = None;
        for _ in 0..300 {
            host.clock.advance_hours(rng.random::<f64>() * 3.0);
            ledger.advance_hour(&env);
            let courier = ledger.courier(&id).unwrap();
            assert!((0.0..=1.0).contains(&courier.journey_progress));
            // Progress restarts with each phase.
            if courier.state == last.0 {
                assert!(
                    courier.journey_progress >= last.1,
                    "seed {seed}: progress went back from {} to {}",
                    last.1,
                    courier.journey_progress
                );
            }
            last = (courier.state, courier.journey_progress);
            match terminal {
                Some(state) => assert_eq!(courier.state, state),
                None if courier.state.is_terminal() => terminal = Some(courier.state),
                None => {}
            }
        }
        assert!(terminal.is_some(), "seed {seed}: courier never finished");
        let courier = ledger.courier(&id).unwrap();
        assert_eq!(courier.has_returned_info, courier.state == CourierState::Delivered);
    }
}

// === CARAVANS ===

#[test]
fn caravan_hold_never_overflows() {
    for seed in SEEDS {
        let host = Host::new(valley());
        let env = host.env();
        let mut ledger = Ledger::with_seed(TradeConfig::default(), seed);
        let caravan = ledger
            .create_caravan("hero".into(), "mill".into(), 20_000, &env)
            .unwrap();
        let route = ledger
            .plan_route(&caravan, vec!["mill".into(), "ford".into(), "keep".into()], true, &env)
            .unwrap();
        assert!(ledger.assign_route(&caravan, route, &env).unwrap());

        for _ in 0..120 {
            host.clock.advance_days(1.0);
            ledger.advance_day(&env);
            let c = ledger.caravan(&caravan).unwrap();
            assert!(c.cargo_units() <= c.cargo_capacity);
            assert!(c.cargo.values().all(|&q| q > 0));
            assert!(c.security_level >= 1);
            if !c.is_active {
                break;
            }
        }
    }
}

// === PRICE ANALYTICS ===

#[test]
fn reported_routes_clear_the_margin_floor_in_order() {
    let mut tracker = PriceTracker::default();
    let mut rng = StdRng::seed_from_u64(11);
    let towns = ["mill", "ford", "keep", "port"];
    let items = ["grain", "iron", "salt"];
    for day in 0..10 {
        let now = Timestamp::from_days(day as f64);
        for town in towns {
            for item in items {
                let price = rng.random_range(5..80);
                tracker.record_price(&item.into(), &town.into(), price, now);
            }
        }
    }
    let now = Timestamp::from_days(9.5);
    let routes = tracker.profitable_routes(8, now);
    assert!(routes.len() <= 8);
    for route in &routes {
        assert!(route.margin_percent > 10.0);
        assert_ne!(route.buy_location, route.sell_location);
    }
    for pair in routes.windows(2) {
        assert!(pair[0].margin_percent >= pair[1].margin_percent);
    }
}

#[test]
fn averages_without_history_or_window_points() {
    let mut tracker = PriceTracker::default();
    let item = ItemId::from("grain");
    let town = LocationId::from("mill");
    assert_eq!(tracker.average_price(&item, &town, 7.0, Timestamp::ZERO), 0.0);

    tracker.record_price(&item, &town, 14, Timestamp::ZERO);
    // A single point answers for any window, even one that excludes it.
    let later = Timestamp::from_days(30.0);
    assert_eq!(tracker.average_price(&item, &town, 7.0, later), 14.0);
    assert_eq!(tracker.average_price(&item, &town, 0.5, later), 14.0);
    assert_eq!(tracker.trend(&item, &town, 7.0, later), 0.0);
}

#[test]
fn forecast_stays_positive_under_steep_decline() {
    let mut ledger = Ledger::with_seed(TradeConfig::default(), 5);
    let item = ItemId::from("grain");
    let town = LocationId::from("mill");
    for (day, price) in [(0.0, 100), (1.0, 60), (2.0, 30), (3.0, 10), (4.0, 2)] {
        ledger.record_price(&item, &town, price, Timestamp::from_days(day));
    }
    let now = Timestamp::from_days(4.0);
    for days_ahead in [1.0, 10.0, 100.0] {
        assert!(ledger.forecast(&item, &town, days_ahead, now) >= 1);
    }
    assert_eq!(ledger.forecast(&"iron".into(), &town, 3.0, now), 0);
}
