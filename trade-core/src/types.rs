use serde::{Deserialize, Serialize};
use std::fmt;
use tsify_next::Tsify;

// ============================================================================
// IDs - Stable string identifiers
// ============================================================================

/// Declares a transparent string newtype used as a map key.
macro_rules! string_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }

                /// Empty or whitespace-only ids are treated as missing.
                pub fn is_blank(&self) -> bool {
                    self.0.trim().is_empty()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }

            impl From<&str> for $name {
                fn from(id: &str) -> Self {
                    Self(id.to_string())
                }
            }

            impl From<String> for $name {
                fn from(id: String) -> Self {
                    Self(id)
                }
            }
        )*
    };
}

string_id! {
    /// A settlement owned by the host game.
    LocationId;
    /// A tradeable item type.
    ItemId;
    /// An NPC merchant.
    MerchantId;
    /// A hero leading a caravan.
    HeroId;
    ShopId;
    CaravanId;
    CourierId;
    AgreementId;
}

/// Denars. Capital may go negative; that is a terminal condition, not an error.
pub type Denars = i64;

/// Quantities of goods are whole units.
pub type Quantity = i64;

pub const HOURS_PER_DAY: f64 = 24.0;

// ============================================================================
// Timestamp - Game time in hours since campaign start
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize, Tsify)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);

    pub fn from_hours(hours: f64) -> Self {
        Self(hours)
    }

    pub fn from_days(days: f64) -> Self {
        Self(days * HOURS_PER_DAY)
    }

    pub fn hours(self) -> f64 {
        self.0
    }

    pub fn days(self) -> f64 {
        self.0 / HOURS_PER_DAY
    }

    /// Whole simulated day this instant falls in.
    pub fn day_index(self) -> i64 {
        self.days().floor() as i64
    }

    pub fn add_hours(self, hours: f64) -> Self {
        Self(self.0 + hours)
    }

    pub fn add_days(self, days: f64) -> Self {
        Self(self.0 + days * HOURS_PER_DAY)
    }

    /// Hours elapsed from `earlier` to `self`; negative if `earlier` is later.
    pub fn hours_since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }

    pub fn days_since(self, earlier: Timestamp) -> f64 {
        self.hours_since(earlier) / HOURS_PER_DAY
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = self.day_index();
        let hour = self.0 - day as f64 * HOURS_PER_DAY;
        write!(f, "day {day} {hour:05.2}h")
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

// ============================================================================
// Entity states
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum CourierState {
    Ready,
    Traveling,
    Gathering,
    Returning,
    Delivered,
    Lost,
}

impl CourierState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CourierState::Delivered | CourierState::Lost)
    }

    /// States in which journey progress accumulates.
    pub fn is_underway(self) -> bool {
        matches!(
            self,
            CourierState::Traveling | CourierState::Gathering | CourierState::Returning
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum CaravanState {
    Idle,
    Traveling,
    Trading,
    UnderAttack,
    Returning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum AgreementKind {
    /// The player buys from the merchant.
    Buy,
    /// The player sells to the merchant.
    Sell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_day_arithmetic() {
        let t = Timestamp::from_days(2.5);
        assert_eq!(t.hours(), 60.0);
        assert_eq!(t.day_index(), 2);
        assert_eq!(t.add_hours(12.0).day_index(), 3);
        assert_eq!(t.add_days(1.0).days_since(t), 1.0);
    }

    #[test]
    fn blank_ids_are_detected() {
        assert!(LocationId::new("  ").is_blank());
        assert!(!ItemId::from("grain").is_blank());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&CaravanId::new("caravan-000001")).unwrap();
        assert_eq!(json, "\"caravan-000001\"");
    }
}
