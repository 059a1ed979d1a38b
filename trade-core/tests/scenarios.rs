//! End-to-end runs of the ledger against a table-driven world.
//!
//! The host here mirrors what a game would do: an hourly calendar that ticks
//! couriers every hour and runs the daily pass when midnight is crossed.

use trade_core::{
    AgreementKind, Clock, CourierState, DayReport, Employee, Environment, ItemId, Ledger,
    ManualClock, MerchantId, NotificationLog, StaticWorld, TradeConfig, TradeError,
    TradeSimulation, capture_portfolio, decompose_day,
};

// === TEST FIXTURES ===

struct Host {
    world: StaticWorld,
    clock: ManualClock,
    log: NotificationLog,
}

impl Host {
    fn new() -> Self {
        Self {
            world: valley(),
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

    /// Step the calendar hour by hour, collecting a report per midnight.
    fn run_days(&self, ledger: &mut Ledger, days: u32) -> Vec<DayReport> {
        let mut reports = Vec::new();
        for _ in 0..days * 24 {
            let day_before = self.clock.now().day_index();
            self.clock.advance_hours(1.0);
            let env = self.env();
            ledger.advance_hour(&env);
            if self.clock.now().day_index() > day_before {
                reports.push(ledger.advance_day(&env));
            }
        }
        reports
    }
}

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

fn safe_roads() -> TradeConfig {
    TradeConfig {
        courier_risk_factor: 0.0,
        ..TradeConfig::default()
    }
}

// === SCENARIOS ===

#[test]
fn three_week_season() {
    let host = Host::new();
    let env = host.env();
    let mut ledger = Ledger::with_seed(safe_roads(), 42);
    let grain = ItemId::from("grain");
    let merchant = MerchantId::from("miller");

    let shop = ledger.create_shop("ford".into(), 20_000, &env).unwrap();
    assert!(ledger.stock_shop(&shop, &grain, 200, &env).unwrap());
    assert_eq!(ledger.shop(&shop).unwrap().capital, 10_000 - 200 * 12);
    let config = ledger.config().clone();
    let clerk = Employee::new("Ada", 60, &config);
    assert!(ledger.shop_mut(&shop).unwrap().hire(clerk, &config).unwrap());

    let caravan = ledger
        .create_caravan("hero".into(), "mill".into(), 8_000, &env)
        .unwrap();
    let route = ledger
        .plan_route(&caravan, vec!["mill".into(), "ford".into()], true, &env)
        .unwrap();
    assert!(ledger.assign_route(&caravan, route, &env).unwrap());

    let courier = ledger.hire_courier("mill".into(), "keep".into(), 80, &env).unwrap();
    assert!(ledger.dispatch_courier(&courier, &env).unwrap());

    let agreement = ledger
        .propose_agreement(&merchant, AgreementKind::Sell, grain.clone(), 40, 12, 5.0, &env)
        .unwrap();
    assert!(ledger.fulfill_agreement(&merchant, &agreement, 10, &env).unwrap());

    let before = capture_portfolio(&ledger, host.clock.now());
    let reports = host.run_days(&mut ledger, 21);

    assert_eq!(reports.len(), 21);
    assert_eq!(reports.first().map(|r| r.day), Some(1));
    assert_eq!(reports.last().map(|r| r.day), Some(21));
    assert!(reports.iter().all(|r| r.shops_ticked == 1));
    assert_eq!(reports.iter().map(|r| r.agreements_expired).sum::<usize>(), 1);

    // Courier: 10.8h out, 12h gathering, 10.8h back.
    let c = ledger.courier(&courier).unwrap();
    assert_eq!(c.state, CourierState::Delivered);
    let report = ledger.latest_courier_report(&"keep".into());
    let seen_grain = report[&grain];
    assert!((19..=21).contains(&seen_grain), "grain seen at {seen_grain}");
    assert!(report.contains_key(&ItemId::from("iron")));
    assert_eq!(host.log.count_matching("is back with"), 1);

    let relation = ledger.relation(&merchant).unwrap();
    assert_eq!(relation.success_count, 1);
    assert_eq!(relation.fail_count, 1);
    assert!(!relation.agreements[&agreement].is_active);

    let s = ledger.shop(&shop).unwrap();
    assert!(s.lifetime_sales > 0);
    assert!(s.inventory.get(&grain).copied().unwrap_or(0) < 200);
    let ford_history = ledger.prices().history(&grain, &"ford".into()).unwrap();
    assert_eq!(ford_history.points.len(), 21);

    let after = capture_portfolio(&ledger, host.clock.now());
    let shop_grain = s.inventory.get(&grain).copied().unwrap_or(0);
    let caravan_grain = ledger
        .caravan(&caravan)
        .unwrap()
        .cargo
        .get(&grain)
        .copied()
        .unwrap_or(0);
    assert_eq!(
        after.goods.get(&grain).copied().unwrap_or(0),
        shop_grain + caravan_grain
    );
    let flow = decompose_day(&before, &after);
    assert_eq!(flow.shop_sales_delta, s.lifetime_sales);
    assert_eq!(flow.capital_delta, after.total_capital() - before.total_capital());
}

#[test]
fn broke_caravan_disbands_once_and_frees_its_slot() {
    let host = Host::new();
    let env = host.env();
    let config = TradeConfig {
        max_caravans: 1,
        ..TradeConfig::default()
    };
    let mut ledger = Ledger::with_seed(config, 7);
    let caravan = ledger
        .create_caravan("hero".into(), "mill".into(), 100, &env)
        .unwrap();
    assert!(matches!(
        ledger.create_caravan("other".into(), "mill".into(), 100, &env),
        Err(TradeError::LimitReached { kind: "caravan", max: 1 })
    ));

    let reports = host.run_days(&mut ledger, 12);

    let c = ledger.caravan(&caravan).unwrap();
    assert!(!c.is_active);
    assert!(c.capital < 0);
    assert_eq!(host.log.count_matching("ran out of money"), 1);
    assert_eq!(reports.last().map(|r| r.caravans_ticked), Some(0));
    assert!(ledger
        .create_caravan("other".into(), "mill".into(), 100, &env)
        .is_ok());
}

#[test]
fn idle_merchant_loses_trust_after_two_weeks() {
    let host = Host::new();
    let env = host.env();
    let mut ledger = Ledger::with_seed(TradeConfig::default(), 3);
    let merchant = MerchantId::from("smith");
    ledger.record_merchant_trade(&merchant, 1_000, true, &env).unwrap();
    let start = ledger.relation(&merchant).unwrap().trust;

    host.run_days(&mut ledger, 14);
    assert_eq!(ledger.relation(&merchant).unwrap().trust, start);

    host.run_days(&mut ledger, 6);
    assert!(ledger.relation(&merchant).unwrap().trust < start);
}

#[test]
fn unavailable_merchant_refuses_new_agreements() {
    let mut host = Host::new();
    host.world.set_merchant_available("smith", false);
    let env = host.env();
    let mut ledger = Ledger::with_seed(TradeConfig::default(), 3);
    let result = ledger.propose_agreement(
        &MerchantId::from("smith"),
        AgreementKind::Buy,
        "iron".into(),
        10,
        70,
        10.0,
        &env,
    );
    assert!(matches!(result, Err(TradeError::AgreementNotAllowed)));
}

#[test]
fn hosted_simulation_survives_save_and_load() {
    let mut sim = TradeSimulation::new(valley(), 9);
    sim.create_shop("keep", 15_000).unwrap();
    sim.create_caravan("hero", "mill", 4_000).unwrap();
    for _ in 0..3 {
        sim.advance_day();
    }
    assert_eq!(sim.now_hours(), 72.0);

    let saved = sim.save().unwrap();
    let mut other = TradeSimulation::new(valley(), 9);
    other.load(&saved, 9).unwrap();
    assert_eq!(other.now_hours(), 72.0);
    assert_eq!(other.ledger().snapshot(), sim.ledger().snapshot());
    assert_eq!(other.save().unwrap(), saved);
}
