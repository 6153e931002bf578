//! Shared fixture for reward engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use uptime_rewards::{
    Collaborators, InMemoryMembership, InMemoryRoles, RewardEngine, Role, TokenCustody,
};
use uptime_storage::{MemoryRewardStore, RewardStore, SledRewardStore};
use uptime_time::{Clock, ManualClock};
use uptime_types::{AccountId, PeerId, PeriodIndex, PoolId, RewardParams};

pub const POOL: PoolId = 7;
pub const PERIOD: u64 = 28_800;
pub const MONTH_PERIODS: u64 = 90;

/// Helper to create a deterministic 32-byte id from a label
pub fn test_id(label: &str) -> [u8; 32] {
    *blake3::hash(label.as_bytes()).as_bytes()
}

pub struct Fixture {
    pub engine: Arc<RewardEngine>,
    pub store: Arc<dyn RewardStore>,
    pub clock: Arc<ManualClock>,
    pub membership: Arc<InMemoryMembership>,
    pub roles: Arc<InMemoryRoles>,
    pub custody: Arc<dyn TokenCustody>,
    pub admin: AccountId,
    pub submitter: AccountId,
}

impl Fixture {
    pub fn memory(custody: Arc<dyn TokenCustody>) -> Self {
        Self::build(Arc::new(MemoryRewardStore::new()), custody)
    }

    pub fn sled(custody: Arc<dyn TokenCustody>) -> Self {
        Self::build(Arc::new(SledRewardStore::temporary().unwrap()), custody)
    }

    pub fn build(store: Arc<dyn RewardStore>, custody: Arc<dyn TokenCustody>) -> Self {
        let clock = Arc::new(ManualClock::new(0, 0));
        let membership = Arc::new(InMemoryMembership::new());
        let roles = Arc::new(InMemoryRoles::new());
        let admin = test_id("admin");
        let submitter = test_id("submitter");
        roles.grant(Role::Admin, admin);
        membership.register_pool(POOL, submitter);

        let engine = RewardEngine::new(
            store.clone(),
            clock.clone(),
            Collaborators {
                membership: membership.clone(),
                custody: custody.clone(),
                roles: roles.clone(),
            },
            RewardParams::default(),
        )
        .unwrap();

        Self {
            engine: Arc::new(engine),
            store,
            clock,
            membership,
            roles,
            custody,
            admin,
            submitter,
        }
    }

    pub fn join(&self, peer: PeerId, owner: AccountId) {
        self.membership.add_member(POOL, peer, owner, 0);
    }

    /// Submit `peers` as online for each period, moving the clock to the
    /// period's midpoint so every submission is inside the window.
    pub fn submit_periods(&self, peers: &[PeerId], periods: impl IntoIterator<Item = PeriodIndex>) {
        for period in periods {
            let timestamp = period * PERIOD + PERIOD / 2;
            if self.clock.now() < timestamp {
                self.clock.set_now(timestamp);
            }
            self.engine
                .submit_online_status(&self.submitter, POOL, peers, timestamp)
                .unwrap();
        }
    }

    pub fn set_period(&self, period: PeriodIndex) {
        self.clock.set_now(period * PERIOD);
    }
}
