//! Operation helpers shared by the service facade
//!
//! - [`PlacementRetry`]: re-runs placements that lost a sibling position race

pub mod placement_retry;

pub use placement_retry::PlacementRetry;
