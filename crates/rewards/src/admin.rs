//! Admin configuration
//!
//! Every setter requires the `Admin` role, rejects zero values and
//! validates the resulting parameter set before persisting it.

use crate::collaborators::Role;
use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::events::RewardEvent;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uptime_types::{AccountId, PoolId, RewardParams, Tokens};

/// Partial parameter update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsUpdate {
    /// Also resets `monthly_cap` to 12x unless a cap is given alongside
    pub reward_rate_per_month: Option<Tokens>,
    pub monthly_cap: Option<Tokens>,
    pub period_length_secs: Option<u64>,
    pub max_batch_size: Option<u32>,
    pub submission_window_secs: Option<u64>,
    pub view_window_periods: Option<u64>,
    pub default_periods_per_claim: Option<u64>,
    pub max_periods_per_claim: Option<u64>,
    pub breaker_cooldown_blocks: Option<u64>,
    pub reward_start_time: Option<u64>,
}

impl ParamsUpdate {
    /// Names of the fields this update sets.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut note = |set: bool, name: &'static str| {
            if set {
                fields.push(name);
            }
        };
        note(self.reward_rate_per_month.is_some(), "reward_rate_per_month");
        note(self.monthly_cap.is_some(), "monthly_cap");
        note(self.period_length_secs.is_some(), "period_length_secs");
        note(self.max_batch_size.is_some(), "max_batch_size");
        note(self.submission_window_secs.is_some(), "submission_window_secs");
        note(self.view_window_periods.is_some(), "view_window_periods");
        note(
            self.default_periods_per_claim.is_some(),
            "default_periods_per_claim",
        );
        note(self.max_periods_per_claim.is_some(), "max_periods_per_claim");
        note(
            self.breaker_cooldown_blocks.is_some(),
            "breaker_cooldown_blocks",
        );
        note(self.reward_start_time.is_some(), "reward_start_time");
        fields
    }

    fn apply_to(&self, params: &RewardParams) -> Result<RewardParams> {
        fn non_zero<T: Copy + Default + PartialEq>(
            value: Option<T>,
            name: &'static str,
        ) -> Result<Option<T>> {
            match value {
                Some(v) if v == T::default() => Err(RewardError::InvalidParameter(format!(
                    "{name} must be non-zero"
                ))),
                other => Ok(other),
            }
        }

        let mut next = params.clone();
        if let Some(rate) = non_zero(self.reward_rate_per_month, "reward_rate_per_month")? {
            next.reward_rate_per_month = rate;
            next.monthly_cap = RewardParams::default_cap_for(rate);
        }
        if let Some(cap) = non_zero(self.monthly_cap, "monthly_cap")? {
            next.monthly_cap = cap;
        }
        if let Some(secs) = non_zero(self.period_length_secs, "period_length_secs")? {
            next.period_length_secs = secs;
        }
        if let Some(size) = non_zero(self.max_batch_size, "max_batch_size")? {
            next.max_batch_size = size;
        }
        if let Some(secs) = non_zero(self.submission_window_secs, "submission_window_secs")? {
            next.submission_window_secs = secs;
        }
        if let Some(periods) = non_zero(self.view_window_periods, "view_window_periods")? {
            next.view_window_periods = periods;
        }
        if let Some(periods) = non_zero(self.default_periods_per_claim, "default_periods_per_claim")? {
            next.default_periods_per_claim = periods;
        }
        if let Some(periods) = non_zero(self.max_periods_per_claim, "max_periods_per_claim")? {
            next.max_periods_per_claim = periods;
        }
        if let Some(blocks) = non_zero(self.breaker_cooldown_blocks, "breaker_cooldown_blocks")? {
            next.breaker_cooldown_blocks = blocks;
        }
        if let Some(start) = non_zero(self.reward_start_time, "reward_start_time")? {
            next.reward_start_time = start;
        }

        next.validate()?;
        Ok(next)
    }
}

impl RewardEngine {
    /// Apply `update` atomically (admin only).
    pub fn update_params(&self, caller: &AccountId, update: ParamsUpdate) -> Result<RewardParams> {
        self.require_role(caller, Role::Admin)?;
        let fields = update.fields();
        if fields.is_empty() {
            return Err(RewardError::InvalidParameter(
                "update sets no parameters".to_string(),
            ));
        }

        let mut params = self.params.write();
        let next = update.apply_to(&params)?;

        if next.period_length_secs != params.period_length_secs {
            let schema = self.store.get_schema()?;
            if schema.schema_locked() {
                return Err(RewardError::SchemaLocked {
                    field: "period_length_secs",
                    version: schema.version,
                });
            }
        }

        self.store.put_params(&next)?;
        *params = next.clone();
        drop(params);

        info!(
            target: "rewards",
            by = %hex::encode(caller),
            fields = ?fields,
            "Reward parameters updated"
        );
        self.record(RewardEvent::ParamsUpdated {
            by: *caller,
            fields,
        });
        Ok(next)
    }

    /// Also resets `monthly_cap` to 12x the new rate.
    pub fn set_reward_rate_per_month(&self, caller: &AccountId, rate: Tokens) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                reward_rate_per_month: Some(rate),
                ..Default::default()
            },
        )
    }

    pub fn set_monthly_cap(&self, caller: &AccountId, cap: Tokens) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                monthly_cap: Some(cap),
                ..Default::default()
            },
        )
    }

    /// Fails once ledger data exists under the current schema version.
    pub fn set_period_length(&self, caller: &AccountId, secs: u64) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                period_length_secs: Some(secs),
                ..Default::default()
            },
        )
    }

    pub fn set_max_batch_size(&self, caller: &AccountId, size: u32) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                max_batch_size: Some(size),
                ..Default::default()
            },
        )
    }

    pub fn set_submission_window(&self, caller: &AccountId, secs: u64) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                submission_window_secs: Some(secs),
                ..Default::default()
            },
        )
    }

    pub fn set_view_window(&self, caller: &AccountId, periods: u64) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                view_window_periods: Some(periods),
                ..Default::default()
            },
        )
    }

    pub fn set_claim_limits(
        &self,
        caller: &AccountId,
        default_periods: u64,
        max_periods: u64,
    ) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                default_periods_per_claim: Some(default_periods),
                max_periods_per_claim: Some(max_periods),
                ..Default::default()
            },
        )
    }

    pub fn set_breaker_cooldown(&self, caller: &AccountId, blocks: u64) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                breaker_cooldown_blocks: Some(blocks),
                ..Default::default()
            },
        )
    }

    pub fn set_reward_start_time(&self, caller: &AccountId, start: u64) -> Result<RewardParams> {
        self.update_params(
            caller,
            ParamsUpdate {
                reward_start_time: Some(start),
                ..Default::default()
            },
        )
    }

    /// Move `amount` out of custody to `to` (admin only). Not gated by
    /// the circuit breaker.
    pub fn emergency_withdraw(
        &self,
        caller: &AccountId,
        pool: PoolId,
        to: &AccountId,
        amount: Tokens,
    ) -> Result<()> {
        self.require_role(caller, Role::Admin)?;
        if amount == 0 {
            return Err(RewardError::InvalidParameter(
                "withdrawal amount must be non-zero".to_string(),
            ));
        }

        self.custody.transfer(pool, to, amount)?;

        warn!(
            target: "rewards",
            by = %hex::encode(caller),
            to = %hex::encode(to),
            pool,
            amount = %amount,
            "Emergency withdrawal executed"
        );
        self.record(RewardEvent::EmergencyWithdrawal {
            by: *caller,
            pool,
            to: *to,
            amount,
        });
        Ok(())
    }
}
