//! Save/load for the ledger.
//!
//! A snapshot holds every entity map keyed by id plus the id counter and the
//! price tracker. Restoring re-establishes entity invariants directly; no ticks
//! are replayed. The random source is not persisted.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::agents::{Courier, TradeCaravan, WholesaleShop};
use crate::config::TradeConfig;
use crate::error::TradeError;
use crate::ledger::Ledger;
use crate::market::PriceTracker;
use crate::relations::MerchantRelation;
use crate::types::{CaravanId, CourierId, MerchantId, ShopId};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub next_id: u64,
    pub shops: BTreeMap<ShopId, WholesaleShop>,
    pub caravans: BTreeMap<CaravanId, TradeCaravan>,
    pub couriers: BTreeMap<CourierId, Courier>,
    pub relations: BTreeMap<MerchantId, MerchantRelation>,
    pub prices: PriceTracker,
}

impl LedgerSnapshot {
    pub fn to_json(&self) -> Result<String, TradeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, TradeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TradeError> {
        Ok(serde_json::from_str(json)?)
    }

    fn validate(&self) -> Result<(), TradeError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(TradeError::UnsupportedSnapshotVersion {
                found: self.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        check_keys("shop", &self.shops, |s| s.id.as_str())?;
        check_keys("caravan", &self.caravans, |c| c.id.as_str())?;
        check_keys("courier", &self.couriers, |c| c.id.as_str())?;
        check_keys("relation", &self.relations, |r| r.merchant_id.as_str())?;
        for relation in self.relations.values() {
            check_keys("agreement", &relation.agreements, |a| a.id.as_str())?;
        }
        Ok(())
    }

    /// Highest numeric id suffix in use, so the restored counter never reissues one.
    fn highest_issued_id(&self) -> u64 {
        let shops = self.shops.keys().map(ShopId::as_str);
        let caravans = self.caravans.keys().map(CaravanId::as_str);
        let couriers = self.couriers.keys().map(CourierId::as_str);
        let agreements = self
            .relations
            .values()
            .flat_map(|r| r.agreements.keys().map(|id| id.as_str()));
        shops
            .chain(caravans)
            .chain(couriers)
            .chain(agreements)
            .filter_map(|id| id.rsplit('-').next()?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }
}

fn check_keys<K, V>(kind: &str, map: &BTreeMap<K, V>, id_of: impl Fn(&V) -> &str) -> Result<(), TradeError>
where
    K: AsRef<str>,
{
    for (key, value) in map {
        if key.as_ref().trim().is_empty() {
            return Err(TradeError::CorruptSnapshot(format!("blank {kind} id")));
        }
        if key.as_ref() != id_of(value) {
            return Err(TradeError::CorruptSnapshot(format!(
                "{kind} stored under {} has id {}",
                key.as_ref(),
                id_of(value)
            )));
        }
    }
    Ok(())
}

impl Ledger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            next_id: self.next_id,
            shops: self.shops.clone(),
            caravans: self.caravans.clone(),
            couriers: self.couriers.clone(),
            relations: self.relations.clone(),
            prices: self.prices.clone(),
        }
    }

    pub fn restore(snapshot: LedgerSnapshot, config: TradeConfig) -> Result<Self, TradeError> {
        Self::restore_with_rng(snapshot, config, StdRng::from_os_rng())
    }

    pub fn restore_with_seed(
        snapshot: LedgerSnapshot,
        config: TradeConfig,
        seed: u64,
    ) -> Result<Self, TradeError> {
        Self::restore_with_rng(snapshot, config, StdRng::seed_from_u64(seed))
    }

    fn restore_with_rng(
        snapshot: LedgerSnapshot,
        config: TradeConfig,
        rng: StdRng,
    ) -> Result<Self, TradeError> {
        snapshot.validate()?;
        let next_id = snapshot.next_id.max(snapshot.highest_issued_id());
        let LedgerSnapshot {
            mut shops,
            mut caravans,
            mut couriers,
            mut relations,
            mut prices,
            ..
        } = snapshot;

        for shop in shops.values_mut() {
            shop.normalize(&config);
        }
        for caravan in caravans.values_mut() {
            caravan.normalize();
        }
        for courier in couriers.values_mut() {
            courier.normalize();
        }
        for relation in relations.values_mut() {
            relation.normalize();
        }
        prices.retention_days = config.price_retention_days;
        prices.normalize();

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "ledger",
            event = "restore",
            shops = shops.len(),
            caravans = caravans.len(),
            couriers = couriers.len(),
            relations = relations.len(),
            next_id = next_id,
        );

        Ok(Self {
            config,
            shops,
            caravans,
            couriers,
            relations,
            prices,
            rng,
            next_id,
        })
    }
}
