//! Reward engine facade
//!
//! `RewardEngine` owns the store, the clock and the collaborators. The
//! operations themselves are implemented across the sibling modules
//! (`ledger`, `eligibility`, `claim`, `breaker`, `schema`, `admin`).
//!
//! Lock order: `params` before `metadata_lock`; the per-participant claim
//! lock is taken with no other engine lock held.

use crate::collaborators::{MembershipOracle, PeerMembership, Role, RoleAuthority, TokenCustody};
use crate::errors::{Result, RewardError};
use crate::events::{EventLog, RewardEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uptime_storage::RewardStore;
use uptime_time::Clock;
use uptime_types::{AccountId, DistributionTotals, PeerId, PoolId, RewardParams, Tokens};

/// External systems the engine calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub membership: Arc<dyn MembershipOracle>,
    pub custody: Arc<dyn TokenCustody>,
    pub roles: Arc<dyn RoleAuthority>,
}

pub struct RewardEngine {
    pub(crate) store: Arc<dyn RewardStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) membership: Arc<dyn MembershipOracle>,
    pub(crate) custody: Arc<dyn TokenCustody>,
    pub(crate) roles: Arc<dyn RoleAuthority>,
    pub(crate) params: RwLock<RewardParams>,
    /// Guards read-modify-write of breaker and schema state
    pub(crate) metadata_lock: Mutex<()>,
    claim_locks: Mutex<HashMap<(PoolId, PeerId), Arc<Mutex<()>>>>,
    pub(crate) events: EventLog,
}

impl RewardEngine {
    /// Build an engine over `store`.
    ///
    /// Parameters already persisted in the store win over `initial_params`,
    /// so admin changes survive restarts.
    pub fn new(
        store: Arc<dyn RewardStore>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        initial_params: RewardParams,
    ) -> Result<Self> {
        let params = match store.get_params()? {
            Some(persisted) => {
                if persisted != initial_params {
                    warn!(
                        target: "rewards",
                        "Persisted reward parameters differ from configuration; keeping persisted values"
                    );
                }
                persisted.validate()?;
                persisted
            }
            None => {
                initial_params.validate()?;
                store.put_params(&initial_params)?;
                initial_params
            }
        };

        info!(
            target: "rewards",
            rate_per_month = %params.reward_rate_per_month,
            period_length = params.period_length_secs,
            monthly_cap = %params.monthly_cap,
            "Reward engine initialised"
        );

        Ok(Self {
            store,
            clock,
            membership: collaborators.membership,
            custody: collaborators.custody,
            roles: collaborators.roles,
            params: RwLock::new(params),
            metadata_lock: Mutex::new(()),
            claim_locks: Mutex::new(HashMap::new()),
            events: EventLog::default(),
        })
    }

    /// Snapshot of the current parameters.
    pub fn params(&self) -> RewardParams {
        self.params.read().clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn totals(&self) -> Result<DistributionTotals> {
        Ok(self.store.get_totals()?)
    }

    /// Total ever paid to `account`.
    pub fn account_claimed(&self, account: &AccountId) -> Result<Tokens> {
        Ok(self.store.get_account_claimed(account)?)
    }

    /// Tokens remaining in custody.
    pub fn custody_available(&self) -> Tokens {
        self.custody.available()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub(crate) fn require_role(&self, caller: &AccountId, role: Role) -> Result<()> {
        if self.roles.has_role(role, caller) {
            Ok(())
        } else {
            Err(RewardError::Unauthorized {
                account: *caller,
                role,
            })
        }
    }

    /// Current membership of `peer`, which must be owned by `account`.
    pub(crate) fn require_owner(
        &self,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
    ) -> Result<PeerMembership> {
        let membership = self
            .membership
            .membership(pool, peer)
            .ok_or(RewardError::NotMember { peer: *peer, pool })?;

        if membership.owner != *account {
            return Err(RewardError::NotOwner {
                account: *account,
                peer: *peer,
                pool,
            });
        }
        Ok(membership)
    }

    pub(crate) fn claim_lock(&self, pool: PoolId, peer: &PeerId) -> Arc<Mutex<()>> {
        self.claim_locks
            .lock()
            .entry((pool, *peer))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn record(&self, event: RewardEvent) {
        self.events.push(event);
    }
}

impl std::fmt::Debug for RewardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardEngine")
            .field("params", &*self.params.read())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{test_id, Harness};
    use crate::RewardError;
    use uptime_types::RewardParams;

    #[test]
    fn persisted_params_survive_restart() {
        let harness = Harness::new();
        let admin = harness.admin;
        harness
            .engine
            .set_reward_rate_per_month(&admin, 9_000)
            .unwrap();

        let reopened = harness.reopen(RewardParams::default());
        assert_eq!(reopened.params().reward_rate_per_month, 9_000);
        assert_eq!(reopened.params().monthly_cap, 108_000);
    }

    #[test]
    fn invalid_initial_params_are_rejected() {
        let params = RewardParams {
            max_batch_size: 0,
            ..Default::default()
        };
        match Harness::try_with_params(params) {
            Err(err) => assert!(matches!(err, RewardError::InvalidParameter(_))),
            Ok(_) => panic!("engine accepted a zero batch size"),
        }
    }

    #[test]
    fn ownership_is_checked_against_current_owner() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        let bob = test_id("bob");
        harness.join(peer, harness.alice, 0);

        assert!(harness.engine.require_owner(&harness.alice, &peer, 1).is_ok());
        assert!(matches!(
            harness.engine.require_owner(&bob, &peer, 1),
            Err(RewardError::NotOwner { .. })
        ));
        assert!(matches!(
            harness.engine.require_owner(&harness.alice, &peer, 2),
            Err(RewardError::NotMember { .. })
        ));
    }
}
