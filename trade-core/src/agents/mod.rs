pub mod caravan;
pub mod courier;
pub mod shop;

pub use caravan::*;
pub use courier::*;
pub use shop::*;
