//! Circuit breaker
//!
//! A tripped breaker halts submissions, eligibility reads, claims and
//! migration. It clears itself once `breaker_cooldown_blocks` execution
//! heights have passed since the trip, or earlier by a privileged reset.

use crate::collaborators::Role;
use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::events::RewardEvent;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uptime_types::{AccountId, BreakerState, RewardParams};

/// Breaker state as seen at the current height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    /// Whether guarded operations are currently refused
    pub tripped: bool,
    pub tripped_at_height: Option<u64>,
    pub clears_at_height: Option<u64>,
    pub current_height: u64,
}

/// Height at which a trip recorded in `state` lapses.
pub fn clears_at(state: &BreakerState, cooldown_blocks: u64) -> u64 {
    state.tripped_at_height.saturating_add(cooldown_blocks)
}

/// Whether `state` still blocks guarded operations at `height`.
pub fn is_blocking(state: &BreakerState, height: u64, cooldown_blocks: u64) -> bool {
    state.tripped && height < clears_at(state, cooldown_blocks)
}

impl RewardEngine {
    /// Gate at the top of every guarded operation.
    pub(crate) fn ensure_operational(&self, params: &RewardParams) -> Result<()> {
        if !self.store.get_breaker()?.tripped {
            return Ok(());
        }

        let _guard = self.metadata_lock.lock();
        let state = self.store.get_breaker()?;
        if !state.tripped {
            return Ok(());
        }

        let height = self.clock.height();
        if is_blocking(&state, height, params.breaker_cooldown_blocks) {
            return Err(RewardError::CircuitBreakerTripped {
                tripped_at: state.tripped_at_height,
                clears_at: clears_at(&state, params.breaker_cooldown_blocks),
            });
        }

        self.store.put_breaker(&BreakerState::default())?;
        metrics::gauge!("uptime_circuit_breaker_tripped").set(0.0);
        info!(
            target: "rewards",
            tripped_at = state.tripped_at_height,
            height,
            "Circuit breaker cooldown elapsed; resuming"
        );
        self.record(RewardEvent::CircuitBreakerReset { by: None, height });
        Ok(())
    }

    /// Halt guarded operations. Tripping again restarts the cooldown.
    pub fn trip_circuit_breaker(&self, caller: &AccountId) -> Result<BreakerStatus> {
        self.require_breaker_authority(caller)?;
        let cooldown = self.params.read().breaker_cooldown_blocks;

        let _guard = self.metadata_lock.lock();
        let height = self.clock.height();
        let state = BreakerState {
            tripped: true,
            tripped_at_height: height,
        };
        self.store.put_breaker(&state)?;

        metrics::gauge!("uptime_circuit_breaker_tripped").set(1.0);
        warn!(
            target: "rewards",
            by = %hex::encode(caller),
            height,
            "Circuit breaker tripped"
        );
        self.record(RewardEvent::CircuitBreakerTripped { by: *caller, height });

        Ok(status_of(&state, height, cooldown))
    }

    pub fn reset_circuit_breaker(&self, caller: &AccountId) -> Result<BreakerStatus> {
        self.require_breaker_authority(caller)?;

        let _guard = self.metadata_lock.lock();
        let height = self.clock.height();
        let state = BreakerState::default();
        self.store.put_breaker(&state)?;

        metrics::gauge!("uptime_circuit_breaker_tripped").set(0.0);
        info!(
            target: "rewards",
            by = %hex::encode(caller),
            height,
            "Circuit breaker reset"
        );
        self.record(RewardEvent::CircuitBreakerReset {
            by: Some(*caller),
            height,
        });

        Ok(status_of(&state, height, 0))
    }

    /// Read-only; an elapsed trip is reported as clear without persisting.
    pub fn circuit_breaker_status(&self) -> Result<BreakerStatus> {
        let cooldown = self.params.read().breaker_cooldown_blocks;
        let state = self.store.get_breaker()?;
        Ok(status_of(&state, self.clock.height(), cooldown))
    }

    fn require_breaker_authority(&self, caller: &AccountId) -> Result<()> {
        if self.roles.has_role(Role::BreakerOperator, caller) {
            return Ok(());
        }
        self.require_role(caller, Role::Admin)
    }
}

fn status_of(state: &BreakerState, height: u64, cooldown: u64) -> BreakerStatus {
    BreakerStatus {
        tripped: is_blocking(state, height, cooldown),
        tripped_at_height: state.tripped.then_some(state.tripped_at_height),
        clears_at_height: state.tripped.then(|| clears_at(state, cooldown)),
        current_height: height,
    }
}
