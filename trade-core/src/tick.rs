//! The capability every simulated asset implements.
//!
//! The ledger drives entities by iterating its typed collections and handing
//! each one a [`TickContext`]. Entities never reach each other; the only shared
//! mutable state is the price tracker and the random source carried here.

use rand::RngCore;

use crate::config::TradeConfig;
use crate::external::Environment;
use crate::market::PriceTracker;
use crate::types::{Severity, Timestamp};

/// Per-pass view of the world handed to each entity.
pub struct TickContext<'a> {
    pub now: Timestamp,
    pub config: &'a TradeConfig,
    pub env: Environment<'a>,
    pub prices: &'a mut PriceTracker,
    pub rng: &'a mut dyn RngCore,
}

impl TickContext<'_> {
    pub fn notify(&self, message: &str, severity: Severity) {
        self.env.notifier.notify(message, severity);
    }
}

pub trait Simulated {
    /// Inactive entities are skipped by the ledger.
    fn is_active(&self) -> bool;

    /// Advance to `ctx.now`. Must be safe to call repeatedly with the same time.
    fn tick(&mut self, ctx: &mut TickContext<'_>);
}

/// Tick every active entity in a collection.
pub fn tick_all<'e, T, I>(entities: I, ctx: &mut TickContext<'_>) -> usize
where
    T: Simulated + 'e,
    I: IntoIterator<Item = &'e mut T>,
{
    let mut ticked = 0;
    for entity in entities {
        if entity.is_active() {
            entity.tick(ctx);
            ticked += 1;
        }
    }
    ticked
}

#[cfg(test)]
pub(crate) mod harness {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{Simulated, TickContext};
    use crate::config::TradeConfig;
    use crate::external::{Environment, ManualClock};
    use crate::market::PriceTracker;
    use crate::types::Timestamp;
    use crate::world::{NotificationLog, StaticWorld};

    /// Owns everything a `TickContext` borrows, for driving one entity by hand.
    pub struct Harness {
        pub world: StaticWorld,
        pub clock: ManualClock,
        pub log: NotificationLog,
        pub prices: PriceTracker,
        pub rng: StdRng,
        pub config: TradeConfig,
    }

    impl Harness {
        pub fn new(world: StaticWorld, config: TradeConfig, seed: u64) -> Self {
            Self {
                world,
                clock: ManualClock::default(),
                log: NotificationLog::new(),
                prices: PriceTracker::new(config.price_retention_days),
                rng: StdRng::seed_from_u64(seed),
                config,
            }
        }

        pub fn tick_at<T: Simulated>(&mut self, entity: &mut T, hours: f64) {
            self.clock.set(Timestamp::from_hours(hours));
            let env = Environment {
                clock: &self.clock,
                oracle: &self.world,
                catalog: &self.world,
                world: &self.world,
                notifier: &self.log,
            };
            let mut ctx = TickContext {
                now: env.now(),
                config: &self.config,
                env,
                prices: &mut self.prices,
                rng: &mut self.rng,
            };
            entity.tick(&mut ctx);
        }

        /// Advance the clock one day at a time, ticking after each step.
        pub fn run_days<T: Simulated>(&mut self, entity: &mut T, days: u32) {
            for _ in 0..days {
                let next = self.clock_hours() + 24.0;
                self.tick_at(entity, next);
            }
        }

        pub fn clock_hours(&self) -> f64 {
            use crate::external::Clock;
            self.clock.now().hours()
        }
    }
}
