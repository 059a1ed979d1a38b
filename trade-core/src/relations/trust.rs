use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::TradeConfig;
use crate::error::TradeError;
use crate::relations::TradeAgreement;
use crate::types::{
    AgreementId, AgreementKind, Denars, ItemId, MerchantId, Quantity, Timestamp,
};

pub const MIN_TRUST: f64 = 0.0;
pub const MAX_TRUST: f64 = 100.0;

// Trust moves by trade value, capped per trade. Losses are capped higher and
// ignore the gain factor.
const SUCCESS_VALUE_PER_POINT: f64 = 1000.0;
const SUCCESS_CAP: f64 = 10.0;
const FAILURE_VALUE_PER_POINT: f64 = 800.0;
const FAILURE_CAP: f64 = 15.0;

const BASE_PRICE_ADJUSTMENT: f64 = 0.05;
const TRUST_PRICE_ADJUSTMENT: f64 = 0.10;

/// What a merchant will pay or charge given the trust they have in the player.
pub fn offer_price(base_price: i64, kind: AgreementKind, trust: f64) -> i64 {
    let adjustment =
        BASE_PRICE_ADJUSTMENT + TRUST_PRICE_ADJUSTMENT * trust.clamp(MIN_TRUST, MAX_TRUST) / 100.0;
    let factor = match kind {
        AgreementKind::Buy => 1.0 - adjustment,
        AgreementKind::Sell => 1.0 + adjustment,
    };
    ((base_price as f64 * factor).round() as i64).max(1)
}

/// Outcome of one daily relation update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelationUpdate {
    pub deactivated: bool,
    pub reactivated: bool,
    pub expired: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRelation {
    pub merchant_id: MerchantId,
    pub trust: f64,
    pub is_active: bool,
    pub success_count: u32,
    pub fail_count: u32,
    pub last_trade_time: Timestamp,
    pub last_visit_time: Option<Timestamp>,
    pub last_update: Timestamp,
    pub agreements: BTreeMap<AgreementId, TradeAgreement>,
    pub total_volume: Denars,
}

impl MerchantRelation {
    pub fn new(merchant_id: MerchantId, now: Timestamp, config: &TradeConfig) -> Self {
        Self {
            merchant_id,
            trust: config.initial_trust.clamp(MIN_TRUST, MAX_TRUST),
            is_active: true,
            success_count: 0,
            fail_count: 0,
            last_trade_time: now,
            last_visit_time: None,
            last_update: now,
            agreements: BTreeMap::new(),
            total_volume: 0,
        }
    }

    // === Trust ===

    pub fn improve_trust(&mut self, delta: f64) {
        if delta > 0.0 {
            self.trust = (self.trust + delta).clamp(MIN_TRUST, MAX_TRUST);
        }
    }

    pub fn reduce_trust(&mut self, delta: f64) {
        if delta > 0.0 {
            self.trust = (self.trust - delta).clamp(MIN_TRUST, MAX_TRUST);
        }
    }

    pub fn record_successful_trade(&mut self, value: Denars, now: Timestamp, config: &TradeConfig) {
        self.success_count += 1;
        self.total_volume += value.max(0);
        self.last_trade_time = now;
        let gain = (value.max(0) as f64 / SUCCESS_VALUE_PER_POINT).min(SUCCESS_CAP);
        self.improve_trust(gain * config.relationship_gain_factor);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "relation",
            day = now.day_index(),
            merchant = self.merchant_id.as_str(),
            event = "success",
            value = value,
            trust = self.trust,
        );
    }

    pub fn record_failed_trade(&mut self, value: Denars, now: Timestamp) {
        self.fail_count += 1;
        let loss = (value.max(0) as f64 / FAILURE_VALUE_PER_POINT).min(FAILURE_CAP);
        self.reduce_trust(loss);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "relation",
            day = now.day_index(),
            merchant = self.merchant_id.as_str(),
            event = "failure",
            value = value,
            trust = self.trust,
        );
    }

    pub fn visit(&mut self, now: Timestamp) {
        self.last_visit_time = Some(now);
    }

    // === Agreements ===

    pub fn active_agreements(&self) -> impl Iterator<Item = &TradeAgreement> {
        self.agreements.values().filter(|a| a.is_active)
    }

    pub fn can_make_agreement(&self, config: &TradeConfig) -> bool {
        self.is_active
            && self.active_agreements().count() < config.max_agreements_per_merchant
            && self.trust >= config.min_trust_for_agreement
    }

    pub fn offer_price(&self, base_price: i64, kind: AgreementKind) -> i64 {
        offer_price(base_price, kind, self.trust)
    }

    /// Strike a new agreement at the trust-adjusted price.
    #[allow(clippy::too_many_arguments)]
    pub fn create_agreement(
        &mut self,
        id: AgreementId,
        kind: AgreementKind,
        item_id: ItemId,
        quantity: Quantity,
        base_price: i64,
        duration_days: f64,
        now: Timestamp,
        config: &TradeConfig,
    ) -> Result<&TradeAgreement, TradeError> {
        if base_price <= 0 {
            return Err(TradeError::NonPositivePrice(base_price));
        }
        let agreement = TradeAgreement::new(
            id.clone(),
            self.merchant_id.clone(),
            kind,
            item_id,
            quantity,
            self.offer_price(base_price, kind),
            now,
            duration_days,
        )?;
        if !self.can_make_agreement(config) {
            return Err(TradeError::AgreementNotAllowed);
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "agreement",
            day = now.day_index(),
            agreement = id.as_str(),
            merchant = self.merchant_id.as_str(),
            kind = ?kind,
            quantity = quantity,
            price = agreement.price,
        );

        Ok(&*self.agreements.entry(id).or_insert(agreement))
    }

    /// Deliver against an agreement. Each accepted delivery counts as a
    /// successful trade worth `amount × price`. A frozen relation accepts nothing.
    pub fn record_agreement_transaction(
        &mut self,
        agreement_id: &AgreementId,
        amount: Quantity,
        now: Timestamp,
        config: &TradeConfig,
    ) -> Result<bool, TradeError> {
        let agreement = self
            .agreements
            .get_mut(agreement_id)
            .ok_or_else(|| TradeError::UnknownEntity {
                kind: "agreement",
                id: agreement_id.to_string(),
            })?;
        if !self.is_active {
            return Ok(false);
        }
        if !agreement.record_transaction(amount, now)? {
            return Ok(false);
        }
        let value = amount * agreement.price;
        self.record_successful_trade(value, now, config);
        Ok(true)
    }

    // === Daily update ===

    /// Daily bookkeeping. An unavailable merchant freezes the relation and
    /// force-closes its agreements; otherwise overdue agreements expire.
    pub fn update(&mut self, now: Timestamp, merchant_available: bool, config: &TradeConfig) -> RelationUpdate {
        let mut outcome = RelationUpdate::default();
        let elapsed_days = now.days_since(self.last_update).max(0.0);
        if now > self.last_update {
            self.last_update = now;
        }

        if !merchant_available {
            if self.is_active {
                self.is_active = false;
                for agreement in self.agreements.values_mut() {
                    agreement.terminate();
                }
                outcome.deactivated = true;
            }
            return outcome;
        }
        if !self.is_active {
            self.is_active = true;
            outcome.reactivated = true;
        }

        if self.trust > MIN_TRUST && now.days_since(self.last_trade_time) > config.trust_inactivity_days {
            self.reduce_trust(config.trust_decay_per_day * elapsed_days);
        }

        let mut failed_value = Vec::new();
        for agreement in self.agreements.values_mut() {
            if agreement.update(now) {
                outcome.expired += 1;
                if agreement.remaining_quantity > 0 {
                    failed_value.push(agreement.remaining_value());
                }
            }
        }
        for value in failed_value {
            self.record_failed_trade(value, now);
        }
        outcome
    }

    pub(crate) fn normalize(&mut self) {
        self.trust = if self.trust.is_finite() {
            self.trust.clamp(MIN_TRUST, MAX_TRUST)
        } else {
            MIN_TRUST
        };
        for agreement in self.agreements.values_mut() {
            agreement.normalize();
            if !self.is_active {
                agreement.terminate();
            }
        }
    }
}
