use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::TradeError;
use crate::types::{AgreementId, AgreementKind, Denars, ItemId, MerchantId, Quantity, Timestamp};

/// A standing deal to buy or sell a fixed quantity at a fixed price before a deadline.
///
/// Active until every unit is delivered (fulfilled) or the deadline passes
/// (expired). Expiry is only noticed by [`TradeAgreement::update`]. A
/// terminated agreement stays closed for good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct TradeAgreement {
    pub id: AgreementId,
    pub merchant_id: MerchantId,
    pub kind: AgreementKind,
    pub item_id: ItemId,
    pub quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub price: i64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub is_active: bool,
    pub is_fulfilled: bool,
    #[serde(default)]
    pub is_terminated: bool,
}

impl TradeAgreement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgreementId,
        merchant_id: MerchantId,
        kind: AgreementKind,
        item_id: ItemId,
        quantity: Quantity,
        price: i64,
        now: Timestamp,
        duration_days: f64,
    ) -> Result<Self, TradeError> {
        if item_id.is_blank() {
            return Err(TradeError::MissingId("item"));
        }
        if quantity <= 0 {
            return Err(TradeError::NonPositiveQuantity(quantity));
        }
        if price <= 0 {
            return Err(TradeError::NonPositivePrice(price));
        }
        if !(duration_days > 0.0) {
            return Err(TradeError::NonPositiveDuration(duration_days));
        }
        Ok(Self {
            id,
            merchant_id,
            kind,
            item_id,
            quantity,
            remaining_quantity: quantity,
            price,
            start_time: now,
            end_time: now.add_days(duration_days),
            is_active: true,
            is_fulfilled: false,
            is_terminated: false,
        })
    }

    /// Past the deadline with goods still owed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.is_fulfilled && now >= self.end_time
    }

    pub fn remaining_value(&self) -> Denars {
        self.remaining_quantity * self.price
    }

    /// Deliver part of the agreement. Closed agreements ignore the call.
    pub fn record_transaction(&mut self, amount: Quantity, now: Timestamp) -> Result<bool, TradeError> {
        if amount <= 0 {
            return Err(TradeError::NonPositiveQuantity(amount));
        }
        if !self.is_active || self.is_fulfilled || self.is_terminated || self.is_expired(now) {
            return Ok(false);
        }
        if amount > self.remaining_quantity {
            return Err(TradeError::TransactionRejected {
                requested: amount,
                remaining: self.remaining_quantity,
            });
        }
        self.remaining_quantity -= amount;
        if self.remaining_quantity == 0 {
            self.is_fulfilled = true;
            self.is_active = false;
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "agreement",
            day = now.day_index(),
            agreement = self.id.as_str(),
            merchant = self.merchant_id.as_str(),
            amount = amount,
            remaining = self.remaining_quantity,
            fulfilled = self.is_fulfilled,
        );
        Ok(true)
    }

    /// Push the deadline back. An agreement that expired with goods still owed
    /// comes back to life if the new deadline is in the future. Fulfilled and
    /// terminated agreements ignore the call.
    pub fn extend_duration(&mut self, days: f64, now: Timestamp) -> Result<bool, TradeError> {
        if !(days > 0.0) {
            return Err(TradeError::NonPositiveDuration(days));
        }
        if self.is_fulfilled || self.is_terminated {
            return Ok(false);
        }
        self.end_time = self.end_time.add_days(days);
        if !self.is_active && self.remaining_quantity > 0 && now < self.end_time {
            self.is_active = true;
        }
        Ok(true)
    }

    /// Order more units. A fulfilled agreement reopens if its deadline has not
    /// passed; a terminated one ignores the call.
    pub fn increase_quantity(&mut self, amount: Quantity, now: Timestamp) -> Result<bool, TradeError> {
        if amount <= 0 {
            return Err(TradeError::NonPositiveQuantity(amount));
        }
        if self.is_terminated {
            return Ok(false);
        }
        self.quantity += amount;
        self.remaining_quantity += amount;
        if self.is_fulfilled {
            self.is_fulfilled = false;
            self.is_active = now < self.end_time;
        }
        Ok(true)
    }

    /// Close the agreement if its deadline has passed. Returns `true` on the
    /// tick it expires.
    pub fn update(&mut self, now: Timestamp) -> bool {
        if self.is_active && self.is_expired(now) {
            self.is_active = false;
            return true;
        }
        false
    }

    /// Forced close, e.g. when the merchant disappears. Neither extension nor
    /// more quantity brings it back.
    pub fn terminate(&mut self) {
        self.is_active = false;
        self.is_terminated = true;
    }

    pub(crate) fn normalize(&mut self) {
        self.quantity = self.quantity.max(0);
        self.remaining_quantity = self.remaining_quantity.clamp(0, self.quantity);
        if self.is_fulfilled {
            self.remaining_quantity = 0;
            self.is_active = false;
        } else if self.is_terminated {
            self.is_active = false;
        } else if self.remaining_quantity == 0 && self.quantity > 0 {
            self.is_fulfilled = true;
            self.is_active = false;
        }
    }
}
