// src/period.rs
//
// Period clock: pure mapping from unix seconds to fixed-width period
// indices and calendar month buckets. Every ledger key, cursor and cap
// counter in the reward engine is derived from these functions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==== CONSTANTS ====

/// Default period width: 8 hours.
pub const DEFAULT_PERIOD_LENGTH_SECS: u64 = 8 * 60 * 60;

/// Default calendar month width: 30 days.
pub const DEFAULT_MONTH_LENGTH_SECS: u64 = 30 * 24 * 60 * 60;

/// Index of a fixed-width period since the unix epoch.
pub type PeriodIndex = u64;

/// Index of a calendar month since the unix epoch.
pub type MonthIndex = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodClockError {
    #[error("period length must be greater than zero")]
    ZeroPeriodLength,
    #[error("month length {month_length}s is shorter than period length {period_length}s")]
    MonthShorterThanPeriod { period_length: u64, month_length: u64 },
}

// ==== PERIOD CLOCK ====

/// Stateless period arithmetic over a fixed period and month width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClock {
    period_length: u64,
    month_length: u64,
}

impl PeriodClock {
    pub fn new(period_length: u64, month_length: u64) -> Result<Self, PeriodClockError> {
        if period_length == 0 {
            return Err(PeriodClockError::ZeroPeriodLength);
        }
        if month_length < period_length {
            return Err(PeriodClockError::MonthShorterThanPeriod {
                period_length,
                month_length,
            });
        }
        Ok(Self {
            period_length,
            month_length,
        })
    }

    pub fn period_length(&self) -> u64 {
        self.period_length
    }

    pub fn month_length(&self) -> u64 {
        self.month_length
    }

    /// `floor(timestamp / period_length)`
    pub fn period_index_of(&self, timestamp: u64) -> PeriodIndex {
        timestamp / self.period_length
    }

    /// Inclusive start of a period in unix seconds.
    pub fn period_start(&self, period: PeriodIndex) -> u64 {
        period.saturating_mul(self.period_length)
    }

    /// Exclusive end of a period, which is also the start of the next one.
    pub fn period_end(&self, period: PeriodIndex) -> u64 {
        self.period_start(period.saturating_add(1))
    }

    /// Calendar month a period belongs to, decided by its start time.
    ///
    /// A period that straddles a month boundary is charged to the month in
    /// which it starts.
    pub fn month_of_period(&self, period: PeriodIndex) -> MonthIndex {
        self.period_start(period) / self.month_length
    }

    pub fn month_index_of(&self, timestamp: u64) -> MonthIndex {
        timestamp / self.month_length
    }

    /// Start of the period containing `timestamp`, i.e. the latest fully
    /// completed period boundary at or before it.
    pub fn completed_boundary(&self, timestamp: u64) -> u64 {
        self.period_start(self.period_index_of(timestamp))
    }

    pub fn periods_per_month(&self) -> u64 {
        self.month_length / self.period_length
    }

    /// Per-period reward: `rate_per_month / periods_per_month`, rounded down.
    ///
    /// The division remainder is not owed to anyone.
    pub fn reward_per_period(&self, rate_per_month: u128) -> u128 {
        rate_per_month / self.periods_per_month() as u128
    }

    /// Rounding loss per fully-online month at `rate_per_month`.
    pub fn monthly_rounding_loss(&self, rate_per_month: u128) -> u128 {
        rate_per_month % self.periods_per_month() as u128
    }
}

impl Default for PeriodClock {
    fn default() -> Self {
        Self {
            period_length: DEFAULT_PERIOD_LENGTH_SECS,
            month_length: DEFAULT_MONTH_LENGTH_SECS,
        }
    }
}

// ==== TESTS ====
