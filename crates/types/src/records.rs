//! Persisted record types shared by the store and the reward engine

use crate::ids::{AccountId, PeerId, PoolId, Tokens};
use serde::{Deserialize, Serialize};
use uptime_time::MonthIndex;

/// Ledger layout that stored raw online timestamps per participant.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Ledger layout keyed by `(pool, period, participant)`.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Identifies one settlement cursor: `(account, participant, pool)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettlementKey {
    pub account: AccountId,
    pub peer: PeerId,
    pub pool: PoolId,
}

impl SettlementKey {
    pub fn new(account: AccountId, peer: PeerId, pool: PoolId) -> Self {
        Self {
            account,
            peer,
            pool,
        }
    }
}

/// Cap counter value for one calendar month after a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthTotal {
    pub month: MonthIndex,
    /// Absolute amount paid for the month, including this settlement
    pub paid: Tokens,
}

/// Everything one claim writes, applied atomically by the store.
///
/// Applying a settlement also raises the participant's settled-through
/// mark, which every owner's window starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub key: SettlementKey,
    /// Cursor timestamp after the claim
    pub cursor: u64,
    /// New cap counter values for every month touched
    pub month_totals: Vec<MonthTotal>,
    /// Amount paid out by this claim
    pub amount: Tokens,
    /// Values overwritten by this settlement, restored by a revert
    pub prior: SettlementPrior,
}

/// Pre-settlement values of everything a settlement overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPrior {
    pub cursor: Option<u64>,
    pub peer_settled: Option<u64>,
    /// Cap counters before the claim, one per entry of `month_totals`
    pub month_totals: Vec<MonthTotal>,
}

/// Aggregate payout counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionTotals {
    pub total_distributed: Tokens,
    pub total_claims: u64,
}

impl DistributionTotals {
    pub fn record(&mut self, amount: Tokens) {
        self.total_distributed = self.total_distributed.saturating_add(amount);
        self.total_claims = self.total_claims.saturating_add(1);
    }

    /// Undo one `record` of `amount`.
    pub fn unrecord(&mut self, amount: Tokens) {
        self.total_distributed = self.total_distributed.saturating_sub(amount);
        self.total_claims = self.total_claims.saturating_sub(1);
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerState {
    pub tripped: bool,
    /// Execution height at which the breaker was tripped
    pub tripped_at_height: u64,
}

/// Two-level migration cursor: pool position, then participant position
/// within that pool, over the sorted legacy record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCursor {
    pub pool_position: u64,
    pub peer_position: u64,
    pub migrated_participants: u64,
    pub completed: bool,
}

/// Ledger schema bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    pub version: u32,
    /// Schema version under which the first ledger record was written
    pub ledger_in_use_since: Option<u32>,
    pub migration: MigrationCursor,
}

impl Default for SchemaState {
    fn default() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            ledger_in_use_since: None,
            migration: MigrationCursor::default(),
        }
    }
}

impl SchemaState {
    /// Schema-affecting configuration is frozen once ledger data exists
    /// under the current version.
    pub fn schema_locked(&self) -> bool {
        self.ledger_in_use_since == Some(self.version)
    }
}

/// Legacy attendance layout: raw online timestamps per participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyAttendance {
    pub pool: PoolId,
    pub peer: PeerId,
    pub online_timestamps: Vec<u64>,
}
