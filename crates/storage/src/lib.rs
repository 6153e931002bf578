use anyhow::Result;
use uptime_types::{
    AccountId, BreakerState, DistributionTotals, LegacyAttendance, MonthIndex, PeerId,
    PeriodIndex, PoolId, RewardParams, SchemaState, Settlement, SettlementKey, Tokens,
};

pub mod keys;
pub mod memory;
pub mod sled_store;

pub use memory::MemoryRewardStore;
pub use sled_store::SledRewardStore;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt value under {0}")]
    Corrupt(&'static str),
}

/// Abstract reward store.
///
/// Every method is atomic on its own; `apply_settlement` writes a cursor,
/// the participant's settled-through mark, its cap counters and the
/// aggregate counters as one unit. `revert_settlement` undoes exactly that
/// unit from the settlement's recorded prior values.
pub trait RewardStore: Send + Sync {
    // Online-status ledger
    /// Set the online bit for each peer; returns how many were newly set.
    fn set_online(&self, pool: PoolId, period: PeriodIndex, peers: &[PeerId]) -> Result<usize>;
    fn is_online(&self, pool: PoolId, period: PeriodIndex, peer: &PeerId) -> Result<bool>;
    fn online_peers(&self, pool: PoolId, period: PeriodIndex) -> Result<Vec<PeerId>>;
    /// Flag the pool as using the period ledger; returns true the first time.
    fn mark_pool_participating(&self, pool: PoolId) -> Result<bool>;
    fn is_pool_participating(&self, pool: PoolId) -> Result<bool>;

    // Settlement state
    fn get_cursor(&self, key: &SettlementKey) -> Result<Option<u64>>;
    /// Latest cursor written for the participant by any owner.
    fn get_peer_settled(&self, peer: &PeerId, pool: PoolId) -> Result<Option<u64>>;
    fn get_month_paid(&self, peer: &PeerId, pool: PoolId, month: MonthIndex) -> Result<Tokens>;
    fn get_account_claimed(&self, account: &AccountId) -> Result<Tokens>;
    fn get_totals(&self) -> Result<DistributionTotals>;
    fn apply_settlement(&self, settlement: &Settlement) -> Result<()>;
    fn revert_settlement(&self, settlement: &Settlement) -> Result<()>;

    // Engine metadata
    fn get_breaker(&self) -> Result<BreakerState>;
    fn put_breaker(&self, state: &BreakerState) -> Result<()>;
    fn get_schema(&self) -> Result<SchemaState>;
    fn put_schema(&self, state: &SchemaState) -> Result<()>;
    fn get_params(&self) -> Result<Option<RewardParams>>;
    fn put_params(&self, params: &RewardParams) -> Result<()>;

    // Legacy attendance layout
    fn put_legacy_attendance(&self, record: &LegacyAttendance) -> Result<()>;
    fn get_legacy_attendance(&self, pool: PoolId, peer: &PeerId)
        -> Result<Option<LegacyAttendance>>;
    /// Pools holding legacy records, ascending.
    fn legacy_pools(&self) -> Result<Vec<PoolId>>;
    /// Peers of a pool holding legacy records, ascending.
    fn legacy_peers(&self, pool: PoolId) -> Result<Vec<PeerId>>;
}
