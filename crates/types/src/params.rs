//! Reward engine parameters

use crate::ids::Tokens;
use serde::{Deserialize, Serialize};
use uptime_time::{
    PeriodClock, PeriodClockError, DEFAULT_MONTH_LENGTH_SECS, DEFAULT_PERIOD_LENGTH_SECS,
};

/// Monthly cap expressed as a multiple of the monthly reward rate.
pub const MONTHLY_CAP_MULTIPLIER: u128 = 12;

/// Default monthly reward for a participant that is online every period.
pub const DEFAULT_REWARD_RATE_PER_MONTH: Tokens = 8_000;

/// Default backfill allowance for submitted timestamps: 3 days.
pub const DEFAULT_SUBMISSION_WINDOW_SECS: u64 = 3 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    #[error("invalid reward parameter: {0}")]
    InvalidParameter(&'static str),

    #[error(transparent)]
    Period(#[from] PeriodClockError),
}

/// Tunable parameters of the reward engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardParams {
    /// Value paid per fully-online participant per month
    pub reward_rate_per_month: Tokens,
    /// Width of one attendance period in seconds
    pub period_length_secs: u64,
    /// Width of one calendar month in seconds
    pub month_length_secs: u64,
    /// Maximum paid for one participant in one calendar month
    pub monthly_cap: Tokens,
    /// Maximum participants per online-status submission
    pub max_batch_size: u32,
    /// How far in the past a submitted timestamp may be
    pub submission_window_secs: u64,
    /// Maximum periods one eligibility read walks
    pub view_window_periods: u64,
    /// Periods examined by a claim when the caller does not choose
    pub default_periods_per_claim: u64,
    /// Hard upper bound on periods examined by one claim
    pub max_periods_per_claim: u64,
    /// Execution heights before a tripped circuit breaker clears itself
    pub breaker_cooldown_blocks: u64,
    /// Global start of reward accrual (unix seconds)
    pub reward_start_time: u64,
}

impl Default for RewardParams {
    fn default() -> Self {
        Self {
            reward_rate_per_month: DEFAULT_REWARD_RATE_PER_MONTH,
            period_length_secs: DEFAULT_PERIOD_LENGTH_SECS,
            month_length_secs: DEFAULT_MONTH_LENGTH_SECS,
            monthly_cap: DEFAULT_REWARD_RATE_PER_MONTH * MONTHLY_CAP_MULTIPLIER,
            max_batch_size: 100,
            submission_window_secs: DEFAULT_SUBMISSION_WINDOW_SECS,
            // three months of 8h periods
            view_window_periods: 270,
            default_periods_per_claim: 90,
            max_periods_per_claim: 540,
            // ~1 day at 12s heights
            breaker_cooldown_blocks: 7_200,
            reward_start_time: 0,
        }
    }
}

impl RewardParams {
    pub fn period_clock(&self) -> Result<PeriodClock, ParamsError> {
        Ok(PeriodClock::new(
            self.period_length_secs,
            self.month_length_secs,
        )?)
    }

    /// Per-period reward under the current rate and period width.
    pub fn reward_per_period(&self) -> Result<Tokens, ParamsError> {
        Ok(self
            .period_clock()?
            .reward_per_period(self.reward_rate_per_month))
    }

    /// Default cap for a given monthly rate.
    pub fn default_cap_for(rate_per_month: Tokens) -> Tokens {
        rate_per_month.saturating_mul(MONTHLY_CAP_MULTIPLIER)
    }

    /// Clamp a caller supplied claim size to `[1, max_periods_per_claim]`.
    ///
    /// Zero or anything above the maximum falls back to the default.
    pub fn effective_claim_periods(&self, requested: u64) -> u64 {
        if requested == 0 || requested > self.max_periods_per_claim {
            self.default_periods_per_claim
        } else {
            requested
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        let clock = self.period_clock()?;

        if self.reward_rate_per_month == 0 {
            return Err(ParamsError::InvalidParameter(
                "reward_rate_per_month must be positive",
            ));
        }
        if clock.reward_per_period(self.reward_rate_per_month) == 0 {
            return Err(ParamsError::InvalidParameter(
                "reward_rate_per_month must yield a non-zero per-period reward",
            ));
        }
        if self.monthly_cap == 0 {
            return Err(ParamsError::InvalidParameter("monthly_cap must be positive"));
        }
        if self.max_batch_size == 0 {
            return Err(ParamsError::InvalidParameter(
                "max_batch_size must be positive",
            ));
        }
        if self.submission_window_secs == 0 {
            return Err(ParamsError::InvalidParameter(
                "submission_window_secs must be positive",
            ));
        }
        if self.view_window_periods == 0 {
            return Err(ParamsError::InvalidParameter(
                "view_window_periods must be positive",
            ));
        }
        if self.max_periods_per_claim == 0 {
            return Err(ParamsError::InvalidParameter(
                "max_periods_per_claim must be positive",
            ));
        }
        if self.default_periods_per_claim == 0
            || self.default_periods_per_claim > self.max_periods_per_claim
        {
            return Err(ParamsError::InvalidParameter(
                "default_periods_per_claim must be within [1, max_periods_per_claim]",
            ));
        }
        if self.breaker_cooldown_blocks == 0 {
            return Err(ParamsError::InvalidParameter(
                "breaker_cooldown_blocks must be positive",
            ));
        }

        Ok(())
    }
}
