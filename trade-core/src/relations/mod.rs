//! Player standing with NPC merchants and the agreements built on it.

pub mod agreement;
pub mod trust;

pub use agreement::*;
pub use trust::*;
