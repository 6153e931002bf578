//! Reward engine error taxonomy

use crate::collaborators::{CustodyError, Role};
use thiserror::Error;
use uptime_types::{encode_id, AccountId, ParamsError, PeerId, PoolId};

/// Coarse classification used by callers (and the HTTP layer) to map
/// failures onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    Membership,
    State,
    Resource,
    Storage,
}

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("account {} lacks the {role:?} role", encode_id(.account))]
    Unauthorized { account: AccountId, role: Role },

    #[error("account {} is not the submitter of pool {pool}", encode_id(.account))]
    NotPoolSubmitter { pool: PoolId, account: AccountId },

    #[error("pool {0} has no registered submitter")]
    UnknownPool(PoolId),

    #[error("timestamp {timestamp} is outside the accepted window [{earliest}, {latest}]")]
    InvalidTimestamp {
        timestamp: u64,
        earliest: u64,
        latest: u64,
    },

    #[error("batch of {size} participants is outside [1, {max}]")]
    InvalidBatchSize { size: usize, max: u32 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("peer {} is not a member of pool {pool}", encode_id(.peer))]
    NotMember { peer: PeerId, pool: PoolId },

    #[error("account {} does not own peer {} in pool {pool}", encode_id(.account), encode_id(.peer))]
    NotOwner {
        account: AccountId,
        peer: PeerId,
        pool: PoolId,
    },

    #[error("circuit breaker tripped at height {tripped_at}; clears at height {clears_at}")]
    CircuitBreakerTripped { tripped_at: u64, clears_at: u64 },

    #[error("{field} cannot change once ledger data exists under schema v{version}")]
    SchemaLocked { field: &'static str, version: u32 },

    #[error("legacy migration already completed")]
    MigrationComplete,

    #[error("token transfer failed: {0}")]
    Transfer(#[from] CustodyError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RewardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RewardError::Unauthorized { .. } | RewardError::NotPoolSubmitter { .. } => {
                ErrorKind::Authorization
            }
            RewardError::InvalidTimestamp { .. }
            | RewardError::InvalidBatchSize { .. }
            | RewardError::InvalidParameter(_) => ErrorKind::Validation,
            RewardError::UnknownPool(_)
            | RewardError::NotMember { .. }
            | RewardError::NotOwner { .. } => ErrorKind::Membership,
            RewardError::CircuitBreakerTripped { .. }
            | RewardError::SchemaLocked { .. }
            | RewardError::MigrationComplete => ErrorKind::State,
            RewardError::Transfer(_) => ErrorKind::Resource,
            RewardError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<ParamsError> for RewardError {
    fn from(err: ParamsError) -> Self {
        RewardError::InvalidParameter(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RewardError>;
