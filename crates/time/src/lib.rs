//! Uptime Time Library
//!
//! Provides the time primitives used by the reward engine.
//!
//! # Features
//! - Fixed-width period indexing (`period = timestamp / period_length`)
//! - Calendar month bucketing anchored on period start time
//! - Wall-clock seconds plus a monotonic execution height
//! - A manual clock for deterministic tests and simulations

pub mod clock;
pub mod period;

pub use clock::{Clock, ManualClock, SystemClock, DEFAULT_BLOCK_INTERVAL_SECS};
pub use period::{
    MonthIndex, PeriodClock, PeriodClockError, PeriodIndex, DEFAULT_MONTH_LENGTH_SECS,
    DEFAULT_PERIOD_LENGTH_SECS,
};
