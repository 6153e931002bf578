//! Static registries for a standalone node
//!
//! Pool membership, roles and the custody reserve are owned by other
//! systems in a full deployment. A standalone node seeds in-memory
//! versions of them from its configuration file.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uptime_rewards::{InMemoryMembership, InMemoryRoles, InMemoryTokenCustody, Role};
use uptime_types::{parse_id_or_label, PoolId, Tokens};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Accounts holding the `admin` role
    pub admins: Vec<String>,
    /// Accounts allowed to trip and reset the circuit breaker
    pub breaker_operators: Vec<String>,
    /// Initial custody reserve in base units
    pub custody_reserve: u64,
    pub pools: Vec<PoolSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolSeed {
    pub id: PoolId,
    /// Account allowed to submit online status for the pool
    pub submitter: String,
    #[serde(default)]
    pub members: Vec<MemberSeed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemberSeed {
    pub peer: String,
    pub owner: String,
    #[serde(default)]
    pub joined_at: u64,
}

/// Seeded collaborators handed to the engine.
pub struct Registries {
    pub membership: Arc<InMemoryMembership>,
    pub roles: Arc<InMemoryRoles>,
    pub custody: Arc<InMemoryTokenCustody>,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        let mut accounts = self.admins.iter().chain(&self.breaker_operators);
        if accounts.any(|account| account.trim().is_empty()) {
            bail!("registry accounts must not be empty");
        }

        let mut pools = HashSet::new();
        for pool in &self.pools {
            if !pools.insert(pool.id) {
                bail!("pool {} is configured more than once", pool.id);
            }
            if pool.submitter.trim().is_empty() {
                bail!("pool {} has no submitter", pool.id);
            }
            let mut peers = HashSet::new();
            for member in &pool.members {
                if member.peer.trim().is_empty() || member.owner.trim().is_empty() {
                    bail!("pool {} has a member without peer or owner", pool.id);
                }
                if !peers.insert(parse_id_or_label(&member.peer)) {
                    bail!("peer {} is listed twice in pool {}", member.peer, pool.id);
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Registries {
        let membership = Arc::new(InMemoryMembership::new());
        let roles = Arc::new(InMemoryRoles::new());
        let custody = Arc::new(InMemoryTokenCustody::with_reserve(Tokens::from(
            self.custody_reserve,
        )));

        for admin in &self.admins {
            roles.grant(Role::Admin, parse_id_or_label(admin));
        }
        for operator in &self.breaker_operators {
            roles.grant(Role::BreakerOperator, parse_id_or_label(operator));
        }

        let mut members = 0usize;
        for pool in &self.pools {
            membership.register_pool(pool.id, parse_id_or_label(&pool.submitter));
            for member in &pool.members {
                membership.add_member(
                    pool.id,
                    parse_id_or_label(&member.peer),
                    parse_id_or_label(&member.owner),
                    member.joined_at,
                );
                members += 1;
            }
        }

        info!(
            pools = self.pools.len(),
            members,
            admins = self.admins.len(),
            reserve = self.custody_reserve,
            "Seeded static registries"
        );

        Registries {
            membership,
            roles,
            custody,
        }
    }
}
