//! End-to-end claim scenarios over the public engine API.

mod common;

use common::{test_id, Fixture, MONTH_PERIODS, PERIOD, POOL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use uptime_rewards::{
    ErrorKind, InMemoryTokenCustody, MockTokenCustody, RewardError, TokenCustody,
};
use uptime_storage::{MemoryRewardStore, RewardStore};
use uptime_types::{
    AccountId, BreakerState, DistributionTotals, LegacyAttendance, MonthIndex, PeerId,
    PeriodIndex, PoolId, RewardParams, SchemaState, Settlement, SettlementKey, Tokens,
};

/// Memory store whose settlement writes can be made to fail.
#[derive(Default)]
struct FlakySettlementStore {
    inner: MemoryRewardStore,
    fail_settlements: AtomicBool,
}

impl RewardStore for FlakySettlementStore {
    fn set_online(
        &self,
        pool: PoolId,
        period: PeriodIndex,
        peers: &[PeerId],
    ) -> anyhow::Result<usize> {
        self.inner.set_online(pool, period, peers)
    }
    fn is_online(&self, pool: PoolId, period: PeriodIndex, peer: &PeerId) -> anyhow::Result<bool> {
        self.inner.is_online(pool, period, peer)
    }
    fn online_peers(&self, pool: PoolId, period: PeriodIndex) -> anyhow::Result<Vec<PeerId>> {
        self.inner.online_peers(pool, period)
    }
    fn mark_pool_participating(&self, pool: PoolId) -> anyhow::Result<bool> {
        self.inner.mark_pool_participating(pool)
    }
    fn is_pool_participating(&self, pool: PoolId) -> anyhow::Result<bool> {
        self.inner.is_pool_participating(pool)
    }
    fn get_cursor(&self, key: &SettlementKey) -> anyhow::Result<Option<u64>> {
        self.inner.get_cursor(key)
    }
    fn get_peer_settled(&self, peer: &PeerId, pool: PoolId) -> anyhow::Result<Option<u64>> {
        self.inner.get_peer_settled(peer, pool)
    }
    fn get_month_paid(
        &self,
        peer: &PeerId,
        pool: PoolId,
        month: MonthIndex,
    ) -> anyhow::Result<Tokens> {
        self.inner.get_month_paid(peer, pool, month)
    }
    fn get_account_claimed(&self, account: &AccountId) -> anyhow::Result<Tokens> {
        self.inner.get_account_claimed(account)
    }
    fn get_totals(&self) -> anyhow::Result<DistributionTotals> {
        self.inner.get_totals()
    }
    fn apply_settlement(&self, settlement: &Settlement) -> anyhow::Result<()> {
        if self.fail_settlements.load(Ordering::SeqCst) {
            anyhow::bail!("settlement tree unavailable");
        }
        self.inner.apply_settlement(settlement)
    }
    fn revert_settlement(&self, settlement: &Settlement) -> anyhow::Result<()> {
        self.inner.revert_settlement(settlement)
    }
    fn get_breaker(&self) -> anyhow::Result<BreakerState> {
        self.inner.get_breaker()
    }
    fn put_breaker(&self, state: &BreakerState) -> anyhow::Result<()> {
        self.inner.put_breaker(state)
    }
    fn get_schema(&self) -> anyhow::Result<SchemaState> {
        self.inner.get_schema()
    }
    fn put_schema(&self, state: &SchemaState) -> anyhow::Result<()> {
        self.inner.put_schema(state)
    }
    fn get_params(&self) -> anyhow::Result<Option<RewardParams>> {
        self.inner.get_params()
    }
    fn put_params(&self, params: &RewardParams) -> anyhow::Result<()> {
        self.inner.put_params(params)
    }
    fn put_legacy_attendance(&self, record: &LegacyAttendance) -> anyhow::Result<()> {
        self.inner.put_legacy_attendance(record)
    }
    fn get_legacy_attendance(
        &self,
        pool: PoolId,
        peer: &PeerId,
    ) -> anyhow::Result<Option<LegacyAttendance>> {
        self.inner.get_legacy_attendance(pool, peer)
    }
    fn legacy_pools(&self) -> anyhow::Result<Vec<PoolId>> {
        self.inner.legacy_pools()
    }
    fn legacy_peers(&self, pool: PoolId) -> anyhow::Result<Vec<PeerId>> {
        self.inner.legacy_peers(pool)
    }
}

#[test]
fn full_month_online_pays_7920_once() {
    let custody = Arc::new(InMemoryTokenCustody::with_reserve(1_000_000));
    let fx = Fixture::memory(custody.clone());
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    fx.join(peer, alice);

    fx.submit_periods(&[peer], 0..MONTH_PERIODS);
    fx.set_period(MONTH_PERIODS);

    assert_eq!(fx.engine.calculate_eligible(&alice, &peer, POOL).unwrap(), 7_920);

    let receipt = fx.engine.claim_default(&alice, &peer, POOL).unwrap();
    assert_eq!(receipt.amount, 7_920);
    assert_eq!(custody.balance_of(&alice), 7_920);

    let second = fx.engine.claim_default(&alice, &peer, POOL).unwrap();
    assert_eq!(second.amount, 0);
    assert_eq!(custody.balance_of(&alice), 7_920);
    assert_eq!(fx.engine.calculate_eligible(&alice, &peer, POOL).unwrap(), 0);
}

#[test]
fn offline_middle_month_is_skipped_in_one_claim() {
    let custody = Arc::new(MockTokenCustody::new());
    let fx = Fixture::memory(custody.clone());
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    fx.join(peer, alice);

    fx.submit_periods(&[peer], 0..MONTH_PERIODS);
    fx.submit_periods(&[peer], 2 * MONTH_PERIODS..3 * MONTH_PERIODS);
    fx.set_period(3 * MONTH_PERIODS);

    let receipt = fx.engine.claim(&alice, &peer, POOL, 270).unwrap();
    assert_eq!(receipt.amount, 2 * 7_920);
    assert_eq!(receipt.periods_examined, 270);
    assert_eq!(receipt.periods_paid, 180);
    assert_eq!(receipt.cursor, Some(270 * PERIOD));
    assert_eq!(receipt.remaining_periods, 0);

    assert_eq!(fx.store.get_month_paid(&peer, POOL, 0).unwrap(), 7_920);
    assert_eq!(fx.store.get_month_paid(&peer, POOL, 1).unwrap(), 0);
    assert_eq!(fx.store.get_month_paid(&peer, POOL, 2).unwrap(), 7_920);
}

#[test]
fn insufficient_custody_aborts_claim_atomically() {
    let custody = Arc::new(InMemoryTokenCustody::with_reserve(1_000));
    let fx = Fixture::sled(custody.clone());
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    fx.join(peer, alice);

    fx.submit_periods(&[peer], 0..30);
    fx.set_period(30);

    let err = fx.engine.claim_default(&alice, &peer, POOL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(matches!(err, RewardError::Transfer(_)));

    let key = SettlementKey::new(alice, peer, POOL);
    assert_eq!(fx.store.get_cursor(&key).unwrap(), None);
    assert_eq!(fx.store.get_month_paid(&peer, POOL, 0).unwrap(), 0);
    assert_eq!(fx.store.get_totals().unwrap().total_distributed, 0);
    assert_eq!(custody.available(), 1_000);

    // Smaller claims fit the reserve and resume from the same point.
    let receipt = fx.engine.claim(&alice, &peer, POOL, 10).unwrap();
    assert_eq!(receipt.amount, 880);
    assert_eq!(receipt.cursor, Some(10 * PERIOD));
    assert_eq!(custody.available(), 120);
}

#[test]
fn split_claims_match_one_large_claim() {
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    let online: Vec<u64> = (0..240).filter(|p| p % 3 != 0).collect();

    let single = Fixture::memory(Arc::new(MockTokenCustody::new()));
    single.join(peer, alice);
    single.submit_periods(&[peer], online.iter().copied());
    single.set_period(240);
    let whole = single.engine.claim(&alice, &peer, POOL, 240).unwrap().amount;

    let split = Fixture::memory(Arc::new(MockTokenCustody::new()));
    split.join(peer, alice);
    split.submit_periods(&[peer], online.iter().copied());
    split.set_period(240);
    let mut total = 0;
    for size in [1, 7, 50, 2, 90, 90, 90] {
        total += split.engine.claim(&alice, &peer, POOL, size).unwrap().amount;
    }

    assert_eq!(whole, online.len() as u128 * 88);
    assert_eq!(total, whole);
}

#[test]
fn new_owner_claims_with_own_cursor() {
    let fx = Fixture::memory(Arc::new(MockTokenCustody::new()));
    let alice = test_id("alice");
    let bob = test_id("bob");
    let peer = test_id("peer-1");
    fx.join(peer, alice);

    fx.submit_periods(&[peer], 0..20);
    fx.set_period(20);
    assert_eq!(fx.engine.claim_default(&alice, &peer, POOL).unwrap().amount, 20 * 88);

    fx.membership.transfer_peer(POOL, &peer, bob);
    let err = fx.engine.claim_default(&alice, &peer, POOL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Membership);

    let status = fx.engine.claim_status(&bob, &peer, POOL).unwrap();
    assert_eq!(status.cursor, None);
    assert_eq!(status.unclaimed_periods, 0);
    assert_eq!(fx.engine.calculate_eligible(&bob, &peer, POOL).unwrap(), 0);

    // Periods 0..20 were settled by alice and are not paid again.
    let receipt = fx.engine.claim_default(&bob, &peer, POOL).unwrap();
    assert_eq!(receipt.amount, 0);
    assert_eq!(fx.engine.totals().unwrap().total_distributed, 20 * 88);

    fx.submit_periods(&[peer], 20..25);
    fx.set_period(25);
    let receipt = fx.engine.claim_default(&bob, &peer, POOL).unwrap();
    assert_eq!(receipt.amount, 5 * 88);
    assert_eq!(fx.engine.account_claimed(&bob).unwrap(), 5 * 88);
    assert_eq!(fx.store.get_month_paid(&peer, POOL, 0).unwrap(), 25 * 88);
}

#[test]
fn failed_settlement_write_pays_nothing() {
    let store = Arc::new(FlakySettlementStore::default());
    let custody = Arc::new(MockTokenCustody::new());
    let fx = Fixture::build(store.clone(), custody.clone());
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    fx.join(peer, alice);
    fx.submit_periods(&[peer], 0..10);
    fx.set_period(10);

    store.fail_settlements.store(true, Ordering::SeqCst);
    for _ in 0..2 {
        let err = fx.engine.claim_default(&alice, &peer, POOL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
    assert!(custody.calls().is_empty());

    store.fail_settlements.store(false, Ordering::SeqCst);
    let receipt = fx.engine.claim_default(&alice, &peer, POOL).unwrap();
    assert_eq!(receipt.amount, 880);
    assert_eq!(custody.total_transferred(), 880);
}

#[test]
fn concurrent_claims_never_double_pay() {
    let custody = Arc::new(MockTokenCustody::new());
    let fx = Fixture::memory(custody.clone());
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    fx.join(peer, alice);
    fx.submit_periods(&[peer], 0..MONTH_PERIODS);
    fx.set_period(MONTH_PERIODS);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = fx.engine.clone();
            thread::spawn(move || engine.claim(&alice, &peer, POOL, 15).unwrap().amount)
        })
        .collect();
    let paid: u128 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(paid, 7_920);
    assert_eq!(custody.total_transferred(), 7_920);
    assert_eq!(fx.engine.account_claimed(&alice).unwrap(), 7_920);
}

#[test]
fn sled_engine_resumes_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let alice = test_id("alice");
    let peer = test_id("peer-1");
    let custody: Arc<dyn TokenCustody> = Arc::new(MockTokenCustody::new());

    {
        let store = Arc::new(uptime_storage::SledRewardStore::open(dir.path()).unwrap());
        let fx = Fixture::build(store.clone(), custody.clone());
        fx.join(peer, alice);
        fx.submit_periods(&[peer], 0..60);
        fx.set_period(60);
        assert_eq!(fx.engine.claim(&alice, &peer, POOL, 30).unwrap().amount, 30 * 88);
        store.flush().unwrap();
    }

    let store = Arc::new(uptime_storage::SledRewardStore::open(dir.path()).unwrap());
    let fx = Fixture::build(store, custody);
    fx.join(peer, alice);
    fx.set_period(60);
    let receipt = fx.engine.claim(&alice, &peer, POOL, 90).unwrap();
    assert_eq!(receipt.amount, 30 * 88);
    assert_eq!(fx.engine.totals().unwrap().total_distributed, 60 * 88);
}
