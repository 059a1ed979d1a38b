//! Error type for rejected player commands and snapshot restores.
//!
//! Only invalid input produces an error. Commands issued against an entity in
//! the wrong state are silent no-ops, and bankruptcy is a state transition.

use crate::types::{Denars, ItemId, LocationId};

#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("missing {0} id")]
    MissingId(&'static str),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(i64),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("duration must be positive, got {0} days")]
    NonPositiveDuration(f64),

    #[error("{kind} limit of {max} reached")]
    LimitReached { kind: &'static str, max: usize },

    #[error("insufficient capital: need {needed}, have {available}")]
    InsufficientCapital { needed: Denars, available: Denars },

    #[error("an active shop already exists at {0}")]
    ShopAlreadyExists(LocationId),

    #[error("unknown location {0}")]
    UnknownLocation(LocationId),

    #[error("no usable price for {item} at {location}")]
    NoUsablePrice { item: ItemId, location: LocationId },

    #[error("not enough storage: {requested} requested, {free} free")]
    StorageFull { requested: i64, free: i64 },

    #[error("{kind} {id} not found")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("already at maximum level {0}")]
    MaxLevel(u32),

    #[error("merchant does not accept new agreements")]
    AgreementNotAllowed,

    #[error("transaction of {requested} rejected; {remaining} remaining")]
    TransactionRejected { requested: i64, remaining: i64 },

    #[error("trade route needs at least two waypoints")]
    RouteTooShort,

    #[error("unsupported snapshot version {found}, expected {expected}")]
    UnsupportedSnapshotVersion { found: u32, expected: u32 },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
