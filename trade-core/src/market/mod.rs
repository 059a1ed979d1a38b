pub mod history;
pub mod routes;
pub mod stats;
pub mod tracker;

pub use history::*;
pub use routes::*;
pub use stats::*;
pub use tracker::*;
