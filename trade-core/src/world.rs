//! Table-driven host collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::external::{ItemCatalog, NotificationSink, PriceOracle, WorldMap};
use crate::types::{ItemId, LocationId, MerchantId, Severity};

/// A settlement as the host describes it to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct LocationInfo {
    pub position: (f64, f64),
    pub prosperity: f64,
    /// Spot prices by item id.
    pub prices: BTreeMap<String, i64>,
}

/// In-memory stand-in for the host's world: positions, prosperity, spot prices,
/// tradeable items and merchants that are no longer around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct StaticWorld {
    pub locations: BTreeMap<String, LocationInfo>,
    pub items: Vec<String>,
    #[serde(default)]
    pub unavailable_merchants: BTreeSet<String>,
}

impl StaticWorld {
    pub fn new() -> Self {
        Self::default()
    }

    // === Builder helpers ===

    pub fn with_location(mut self, id: &str, position: (f64, f64), prosperity: f64) -> Self {
        self.add_location(id, position, prosperity);
        self
    }

    pub fn with_item(mut self, id: &str) -> Self {
        if !self.items.iter().any(|i| i == id) {
            self.items.push(id.to_string());
        }
        self
    }

    pub fn with_price(mut self, location: &str, item: &str, price: i64) -> Self {
        self.set_price(location, item, price);
        self
    }

    // === Mutation ===

    pub fn add_location(&mut self, id: &str, position: (f64, f64), prosperity: f64) {
        let info = self.locations.entry(id.to_string()).or_default();
        info.position = position;
        info.prosperity = prosperity;
    }

    /// Set a spot price; unknown locations are created at the origin.
    pub fn set_price(&mut self, location: &str, item: &str, price: i64) {
        self.locations
            .entry(location.to_string())
            .or_default()
            .prices
            .insert(item.to_string(), price);
    }

    pub fn set_merchant_available(&mut self, merchant: &str, available: bool) {
        if available {
            self.unavailable_merchants.remove(merchant);
        } else {
            self.unavailable_merchants.insert(merchant.to_string());
        }
    }
}

impl PriceOracle for StaticWorld {
    fn price_of(&self, item: &ItemId, location: &LocationId) -> i64 {
        self.locations
            .get(location.as_str())
            .and_then(|info| info.prices.get(item.as_str()))
            .copied()
            .unwrap_or(0)
    }
}

impl ItemCatalog for StaticWorld {
    fn eligible_items(&self) -> Vec<ItemId> {
        self.items.iter().map(|i| ItemId::new(i.as_str())).collect()
    }
}

impl WorldMap for StaticWorld {
    fn position(&self, location: &LocationId) -> Option<(f64, f64)> {
        self.locations.get(location.as_str()).map(|info| info.position)
    }

    fn prosperity(&self, location: &LocationId) -> f64 {
        self.locations
            .get(location.as_str())
            .map(|info| info.prosperity)
            .unwrap_or(0.0)
    }

    fn is_merchant_available(&self, merchant: &MerchantId) -> bool {
        !self.unavailable_merchants.contains(merchant.as_str())
    }
}

// ============================================================================
// Notification log
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

/// Collects notifications until the host drains them.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: RefCell<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of collected messages containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|n| n.message.contains(needle))
            .count()
    }
}

impl NotificationSink for NotificationLog {
    fn notify(&self, message: &str, severity: Severity) {
        self.entries.borrow_mut().push(Notification {
            message: message.to_string(),
            severity,
        });
    }
}
