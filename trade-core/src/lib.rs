use wasm_bindgen::prelude::*;

pub mod accounting;
pub mod agents;
pub mod config;
pub mod error;
pub mod external;
pub mod ledger;
pub mod market;
pub mod relations;
pub mod state;
pub mod tick;
pub mod types;
pub mod world;

pub use accounting::*;
pub use agents::*;
pub use config::TradeConfig;
pub use error::TradeError;
pub use external::*;
pub use ledger::*;
pub use market::*;
pub use relations::*;
pub use state::*;
pub use tick::{Simulated, TickContext, tick_all};
pub use types::*;
pub use world::*;

#[cfg(feature = "instrument")]
pub use instrument;

// ============================================================================
// WASM API - TradeSimulation
// ============================================================================

/// A ledger bundled with a table-driven world, for hosts that talk to the
/// core through JavaScript.
#[wasm_bindgen]
pub struct TradeSimulation {
    ledger: Ledger,
    world: StaticWorld,
    clock: ManualClock,
    log: NotificationLog,
}

fn environment<'a>(
    world: &'a StaticWorld,
    clock: &'a ManualClock,
    log: &'a NotificationLog,
) -> Environment<'a> {
    Environment {
        clock,
        oracle: world,
        catalog: world,
        world,
        notifier: log,
    }
}

#[wasm_bindgen]
impl TradeSimulation {
    #[wasm_bindgen(constructor)]
    pub fn new(world: StaticWorld, seed: u64) -> Self {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        Self {
            ledger: Ledger::with_seed(TradeConfig::default(), seed),
            world,
            clock: ManualClock::default(),
            log: NotificationLog::new(),
        }
    }

    /// Create a simulation with knobs from a (possibly partial) JSON document
    #[wasm_bindgen]
    pub fn with_config(world: StaticWorld, config_json: &str, seed: u64) -> Result<TradeSimulation, JsError> {
        let mut sim = Self::new(world, seed);
        sim.ledger = Ledger::with_seed(TradeConfig::from_json(config_json)?, seed);
        Ok(sim)
    }

    #[wasm_bindgen]
    pub fn now_hours(&self) -> f64 {
        self.clock.now().hours()
    }

    /// Advance one hour. Returns the day report when midnight was crossed.
    #[wasm_bindgen]
    pub fn advance_hour(&mut self) -> Result<JsValue, JsError> {
        let report = self.step_hour();
        Ok(serde_wasm_bindgen::to_value(&report)?)
    }

    /// Advance to the next midnight
    #[wasm_bindgen]
    pub fn advance_day(&mut self) -> DayReport {
        loop {
            if let Some(report) = self.step_hour() {
                return report;
            }
        }
    }

    // === World edits ===

    #[wasm_bindgen]
    pub fn set_price(&mut self, location: &str, item: &str, price: i64) {
        self.world.set_price(location, item, price);
    }

    #[wasm_bindgen]
    pub fn set_merchant_available(&mut self, merchant: &str, available: bool) {
        self.world.set_merchant_available(merchant, available);
    }

    // === Commands ===

    #[wasm_bindgen]
    pub fn create_shop(&mut self, location: &str, investment: i64) -> Result<String, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self.ledger.create_shop(location.into(), investment, &env)?.0)
    }

    #[wasm_bindgen]
    pub fn stock_shop(&mut self, shop: &str, item: &str, quantity: i64) -> Result<bool, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self.ledger.stock_shop(&shop.into(), &item.into(), quantity, &env)?)
    }

    #[wasm_bindgen]
    pub fn hire_employee(&mut self, shop: &str, name: &str, skill: u32) -> Result<bool, JsError> {
        let employee = Employee::new(name, skill, self.ledger.config());
        let config = self.ledger.config().clone();
        Ok(self.ledger.shop_mut(&shop.into())?.hire(employee, &config)?)
    }

    #[wasm_bindgen]
    pub fn create_caravan(&mut self, leader: &str, home: &str, capital: i64) -> Result<String, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self
            .ledger
            .create_caravan(leader.into(), home.into(), capital, &env)?
            .0)
    }

    #[wasm_bindgen]
    pub fn send_caravan(&mut self, caravan: &str, destination: &str) -> Result<bool, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self
            .ledger
            .send_caravan(&caravan.into(), destination.into(), &env)?)
    }

    #[wasm_bindgen]
    pub fn assign_route(&mut self, caravan: &str, waypoints: Vec<String>, circular: bool) -> Result<TradeRoute, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        let caravan = CaravanId::new(caravan);
        let waypoints = waypoints.into_iter().map(LocationId::from).collect();
        let route = self.ledger.plan_route(&caravan, waypoints, circular, &env)?;
        self.ledger.assign_route(&caravan, route.clone(), &env)?;
        Ok(route)
    }

    #[wasm_bindgen]
    pub fn party_configuration(&self, caravan: &str) -> Result<JsValue, JsError> {
        let config = self.ledger.party_configuration(&caravan.into());
        Ok(serde_wasm_bindgen::to_value(&config)?)
    }

    #[wasm_bindgen]
    pub fn hire_courier(&mut self, origin: &str, destination: &str, skill: u32) -> Result<String, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self
            .ledger
            .hire_courier(origin.into(), destination.into(), skill, &env)?
            .0)
    }

    #[wasm_bindgen]
    pub fn dispatch_courier(&mut self, courier: &str) -> Result<bool, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self.ledger.dispatch_courier(&courier.into(), &env)?)
    }

    #[wasm_bindgen]
    pub fn propose_agreement(
        &mut self,
        merchant: &str,
        kind: AgreementKind,
        item: &str,
        quantity: i64,
        base_price: i64,
        duration_days: f64,
    ) -> Result<String, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self
            .ledger
            .propose_agreement(&merchant.into(), kind, item.into(), quantity, base_price, duration_days, &env)?
            .0)
    }

    #[wasm_bindgen]
    pub fn fulfill_agreement(&mut self, merchant: &str, agreement: &str, amount: i64) -> Result<bool, JsError> {
        let env = environment(&self.world, &self.clock, &self.log);
        Ok(self
            .ledger
            .fulfill_agreement(&merchant.into(), &agreement.into(), amount, &env)?)
    }

    // === Queries ===

    #[wasm_bindgen]
    pub fn courier_report(&self, destination: &str) -> Result<JsValue, JsError> {
        let report = self.ledger.latest_courier_report(&destination.into());
        Ok(serde_wasm_bindgen::to_value(&report)?)
    }

    #[wasm_bindgen]
    pub fn profitable_routes(&self, top_n: usize) -> Result<JsValue, JsError> {
        let routes = self.ledger.profitable_routes(top_n, self.clock.now());
        Ok(serde_wasm_bindgen::to_value(&routes)?)
    }

    #[wasm_bindgen]
    pub fn forecast(&mut self, item: &str, location: &str, days_ahead: f64) -> i64 {
        let now = self.clock.now();
        self.ledger
            .forecast(&item.into(), &location.into(), days_ahead, now)
    }

    #[wasm_bindgen]
    pub fn portfolio(&self) -> PortfolioSnapshot {
        capture_portfolio(&self.ledger, self.clock.now())
    }

    #[wasm_bindgen]
    pub fn drain_notifications(&self) -> Result<JsValue, JsError> {
        Ok(serde_wasm_bindgen::to_value(&self.log.drain())?)
    }

    // === Persistence ===

    /// Serialize the ledger and the current game time
    #[wasm_bindgen]
    pub fn save(&self) -> Result<String, JsError> {
        let saved = SavedGame {
            now: self.clock.now(),
            ledger: self.ledger.snapshot(),
        };
        Ok(serde_json::to_string(&saved)?)
    }

    #[wasm_bindgen]
    pub fn load(&mut self, json: &str, seed: u64) -> Result<(), JsError> {
        let saved: SavedGame = serde_json::from_str(json)?;
        let config = self.ledger.config().clone();
        self.ledger = Ledger::restore_with_seed(saved.ledger, config, seed)?;
        self.clock.set(saved.now);
        Ok(())
    }
}

impl TradeSimulation {
    /// Couriers move every hour; everything else at midnight.
    fn step_hour(&mut self) -> Option<DayReport> {
        let day_before = self.clock.now().day_index();
        self.clock.advance_hours(1.0);
        let env = environment(&self.world, &self.clock, &self.log);
        self.ledger.advance_hour(&env);
        if env.now().day_index() > day_before {
            Some(self.ledger.advance_day(&env))
        } else {
            None
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SavedGame {
    now: Timestamp,
    ledger: LedgerSnapshot,
}
