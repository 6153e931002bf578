//! Shared types for the uptime reward engine
//!
//! Identifiers, token amounts, tunable parameters and the persisted record
//! layouts used by both the store and the engine.

pub mod ids;
pub mod params;
pub mod records;

pub use ids::*;
pub use params::*;
pub use records::*;

pub use uptime_time::{MonthIndex, PeriodClock, PeriodIndex};
