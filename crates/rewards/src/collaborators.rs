//! External collaborators of the reward engine
//!
//! Pool membership, token custody and role checks live outside the engine.
//! Each is a narrow trait so the node can wire real registries while tests
//! use the in-memory and mock implementations below.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uptime_types::{AccountId, PeerId, PoolId, Tokens};

/// Ownership record of a peer inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMembership {
    pub owner: AccountId,
    /// Unix seconds at which the peer joined the pool
    pub joined_at: u64,
}

/// Read-only view of pool membership.
pub trait MembershipOracle: Send + Sync {
    /// Current membership of `peer` in `pool`, if any.
    fn membership(&self, pool: PoolId, peer: &PeerId) -> Option<PeerMembership>;

    /// Account allowed to submit online status for `pool`.
    fn pool_submitter(&self, pool: PoolId) -> Option<AccountId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Tokens, available: Tokens },
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Token custody that pays claims out of a reward reserve.
pub trait TokenCustody: Send + Sync {
    fn transfer(&self, pool: PoolId, to: &AccountId, amount: Tokens) -> Result<(), CustodyError>;

    /// Tokens still held by custody.
    fn available(&self) -> Tokens;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    BreakerOperator,
}

pub trait RoleAuthority: Send + Sync {
    fn has_role(&self, role: Role, account: &AccountId) -> bool;
}

// -----------------------------------------------------------------------------
// In-memory implementations (for node runtime or testing)
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PoolRegistry {
    submitters: HashMap<PoolId, AccountId>,
    members: HashMap<(PoolId, PeerId), PeerMembership>,
}

/// Pool registry held in memory.
#[derive(Debug, Default)]
pub struct InMemoryMembership {
    inner: RwLock<PoolRegistry>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool (or replace its submitter).
    pub fn register_pool(&self, pool: PoolId, submitter: AccountId) {
        self.inner.write().submitters.insert(pool, submitter);
    }

    pub fn add_member(&self, pool: PoolId, peer: PeerId, owner: AccountId, joined_at: u64) {
        self.inner
            .write()
            .members
            .insert((pool, peer), PeerMembership { owner, joined_at });
    }

    /// Hand a peer to a new owner; the join time is kept.
    pub fn transfer_peer(&self, pool: PoolId, peer: &PeerId, new_owner: AccountId) -> bool {
        match self.inner.write().members.get_mut(&(pool, *peer)) {
            Some(membership) => {
                membership.owner = new_owner;
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&self, pool: PoolId, peer: &PeerId) -> Option<PeerMembership> {
        self.inner.write().members.remove(&(pool, *peer))
    }

    pub fn member_count(&self, pool: PoolId) -> usize {
        self.inner
            .read()
            .members
            .keys()
            .filter(|(p, _)| *p == pool)
            .count()
    }
}

impl MembershipOracle for InMemoryMembership {
    fn membership(&self, pool: PoolId, peer: &PeerId) -> Option<PeerMembership> {
        self.inner.read().members.get(&(pool, *peer)).copied()
    }

    fn pool_submitter(&self, pool: PoolId) -> Option<AccountId> {
        self.inner.read().submitters.get(&pool).copied()
    }
}

/// Role table held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRoles {
    grants: RwLock<HashSet<(Role, AccountId)>>,
}

impl InMemoryRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, role: Role, account: AccountId) {
        self.grants.write().insert((role, account));
    }

    pub fn revoke(&self, role: Role, account: &AccountId) -> bool {
        self.grants.write().remove(&(role, *account))
    }
}

impl RoleAuthority for InMemoryRoles {
    fn has_role(&self, role: Role, account: &AccountId) -> bool {
        self.grants.read().contains(&(role, *account))
    }
}

#[derive(Debug, Default)]
struct CustodyBook {
    reserve: Tokens,
    balances: HashMap<AccountId, Tokens>,
}

/// Reserve-backed custody; a transfer moves tokens from the reserve into
/// the recipient's balance.
#[derive(Debug, Default)]
pub struct InMemoryTokenCustody {
    book: RwLock<CustodyBook>,
}

impl InMemoryTokenCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserve(reserve: Tokens) -> Self {
        let custody = Self::new();
        custody.fund(reserve);
        custody
    }

    pub fn fund(&self, amount: Tokens) {
        let mut book = self.book.write();
        book.reserve = book.reserve.saturating_add(amount);
    }

    pub fn balance_of(&self, account: &AccountId) -> Tokens {
        self.book.read().balances.get(account).copied().unwrap_or(0)
    }
}

impl TokenCustody for InMemoryTokenCustody {
    fn transfer(&self, _pool: PoolId, to: &AccountId, amount: Tokens) -> Result<(), CustodyError> {
        let mut book = self.book.write();
        if book.reserve < amount {
            return Err(CustodyError::InsufficientFunds {
                requested: amount,
                available: book.reserve,
            });
        }
        book.reserve -= amount;
        let balance = book.balances.entry(*to).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn available(&self) -> Tokens {
        self.book.read().reserve
    }
}

// -----------------------------------------------------------------------------
// Mock custody (for deterministic testing)
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<(PoolId, AccountId, Tokens)>,
    fail_with: Option<String>,
}

/// Records every transfer and can be told to reject them.
#[derive(Debug, Default)]
pub struct MockTokenCustody {
    state: RwLock<MockState>,
}

impl MockTokenCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following transfer with `reason`.
    pub fn fail_transfers(&self, reason: &str) {
        self.state.write().fail_with = Some(reason.to_string());
    }

    pub fn accept_transfers(&self) {
        self.state.write().fail_with = None;
    }

    pub fn calls(&self) -> Vec<(PoolId, AccountId, Tokens)> {
        self.state.read().calls.clone()
    }

    pub fn total_transferred(&self) -> Tokens {
        self.state.read().calls.iter().map(|(_, _, amount)| *amount).sum()
    }
}

impl TokenCustody for MockTokenCustody {
    fn transfer(&self, pool: PoolId, to: &AccountId, amount: Tokens) -> Result<(), CustodyError> {
        let mut state = self.state.write();
        if let Some(reason) = &state.fail_with {
            return Err(CustodyError::Rejected(reason.clone()));
        }
        state.calls.push((pool, *to, amount));
        Ok(())
    }

    fn available(&self) -> Tokens {
        Tokens::MAX
    }
}
