//! Uptime reward engine
//!
//! Records per-period online status for pool participants and pays a
//! fixed reward for every online period, bounded by a monthly cap per
//! participant. Claims settle a bounded number of periods per call and
//! resume from a persisted cursor.

pub mod admin;
pub mod breaker;
pub mod claim;
pub mod collaborators;
pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod schema;

pub use admin::ParamsUpdate;
pub use breaker::BreakerStatus;
pub use claim::ClaimReceipt;
pub use collaborators::{
    CustodyError, InMemoryMembership, InMemoryRoles, InMemoryTokenCustody, MembershipOracle,
    MockTokenCustody, PeerMembership, Role, RoleAuthority, TokenCustody,
};
pub use eligibility::ClaimStatus;
pub use engine::{Collaborators, RewardEngine};
pub use errors::{ErrorKind, Result, RewardError};
pub use events::{EventLog, RewardEvent};
pub use ledger::SubmissionReceipt;
pub use schema::{MigrationReport, MigrationStatus};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::collaborators::{InMemoryMembership, InMemoryRoles, MockTokenCustody, Role};
    use crate::engine::{Collaborators, RewardEngine};
    use crate::errors::Result;
    use std::ops::Range;
    use std::sync::Arc;
    use uptime_storage::{MemoryRewardStore, RewardStore};
    use uptime_time::ManualClock;
    use uptime_types::{AccountId, PeerId, PeriodIndex, PoolId, RewardParams};

    pub const POOL: PoolId = 1;
    pub const PERIOD: u64 = 28_800;

    pub fn test_id(label: &str) -> [u8; 32] {
        *blake3::hash(label.as_bytes()).as_bytes()
    }

    pub struct Harness {
        pub engine: RewardEngine,
        pub store: Arc<MemoryRewardStore>,
        pub clock: Arc<ManualClock>,
        pub membership: Arc<InMemoryMembership>,
        pub custody: Arc<MockTokenCustody>,
        pub roles: Arc<InMemoryRoles>,
        pub admin: AccountId,
        pub alice: AccountId,
        pub submitter: AccountId,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::try_with_params(RewardParams::default()).unwrap()
        }

        pub fn try_with_params(params: RewardParams) -> Result<Self> {
            let store = Arc::new(MemoryRewardStore::new());
            let clock = Arc::new(ManualClock::new(0, 0));
            let membership = Arc::new(InMemoryMembership::new());
            let custody = Arc::new(MockTokenCustody::new());
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
                params,
            )?;

            Ok(Self {
                engine,
                store,
                clock,
                membership,
                custody,
                roles,
                admin,
                alice: test_id("alice"),
                submitter,
            })
        }

        /// A second engine over the same store and collaborators.
        pub fn reopen(&self, params: RewardParams) -> RewardEngine {
            RewardEngine::new(
                self.store.clone(),
                self.clock.clone(),
                Collaborators {
                    membership: self.membership.clone(),
                    custody: self.custody.clone(),
                    roles: self.roles.clone(),
                },
                params,
            )
            .unwrap()
        }

        pub fn join(&self, peer: PeerId, owner: AccountId, joined_at: u64) {
            self.membership.add_member(POOL, peer, owner, joined_at);
        }

        /// Set online bits directly, bypassing the submission window.
        pub fn mark_online(&self, peer: &PeerId, periods: Range<PeriodIndex>) {
            for period in periods {
                self.store.set_online(POOL, period, &[*peer]).unwrap();
            }
            self.store.mark_pool_participating(POOL).unwrap();
        }
    }
}
