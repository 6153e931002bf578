//! Property tests for the online-status ledger and claim processor.

mod common;

use common::{test_id, Fixture, PERIOD, POOL};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use uptime_rewards::MockTokenCustody;
use uptime_storage::RewardStore;

fn fixture() -> Fixture {
    Fixture::memory(Arc::new(MockTokenCustody::new()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn submissions_are_idempotent_and_commutative(
        batches in prop::collection::vec(
            prop::collection::vec(0u8..16, 1..8),
            1..10,
        ),
    ) {
        let now = 4 * PERIOD;
        let forward = fixture();
        let backward = fixture();
        forward.clock.set_now(now);
        backward.clock.set_now(now);

        let peers = |batch: &Vec<u8>| -> Vec<[u8; 32]> {
            batch.iter().map(|n| test_id(&format!("peer-{n}"))).collect()
        };

        for batch in &batches {
            forward.engine.submit_online_status(&forward.submitter, POOL, &peers(batch), now).unwrap();
        }
        for batch in batches.iter().rev().chain(batches.iter()) {
            backward.engine.submit_online_status(&backward.submitter, POOL, &peers(batch), now).unwrap();
        }

        let mut a = forward.engine.online_peers(POOL, 4).unwrap();
        let mut b = backward.engine.online_peers(POOL, 4).unwrap();
        a.sort();
        b.sort();
        let distinct: BTreeSet<u8> = batches.iter().flatten().copied().collect();
        prop_assert_eq!(a.len(), distinct.len());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn split_claims_never_exceed_cap_and_cursor_is_monotonic(
        online in prop::collection::btree_set(0u64..200, 0..150),
        sizes in prop::collection::vec(0u64..120, 1..12),
        cap_periods in 1u128..100,
    ) {
        let fx = fixture();
        let alice = test_id("alice");
        let peer = test_id("peer-1");
        fx.join(peer, alice);
        for period in &online {
            fx.store.set_online(POOL, *period, &[peer]).unwrap();
        }
        let cap = cap_periods * 88;
        fx.engine.set_monthly_cap(&fx.admin, cap).unwrap();
        fx.clock.set_now(200 * PERIOD);

        let mut last_cursor = 0;
        let mut paid = 0u128;
        for size in sizes {
            let receipt = fx.engine.claim(&alice, &peer, POOL, size).unwrap();
            let cursor = receipt.cursor.unwrap_or(0);
            prop_assert!(cursor >= last_cursor);
            prop_assert!(cursor <= 200 * PERIOD);
            prop_assert_eq!(cursor % PERIOD, 0);
            last_cursor = cursor;
            paid += receipt.amount;
        }

        for month in 0..3 {
            prop_assert!(fx.store.get_month_paid(&peer, POOL, month).unwrap() <= cap);
        }
        prop_assert_eq!(paid % 88, 0);

        // Every online period before the cursor was paid; none after it.
        let settled = online.iter().filter(|p| **p * PERIOD < last_cursor).count() as u128;
        prop_assert_eq!(paid, settled * 88);
    }

    #[test]
    fn incomplete_period_is_never_credited(
        online in prop::collection::btree_set(0u64..30, 1..30),
        offset in 0u64..PERIOD,
    ) {
        let fx = fixture();
        let alice = test_id("alice");
        let peer = test_id("peer-1");
        fx.join(peer, alice);
        for period in &online {
            fx.store.set_online(POOL, *period, &[peer]).unwrap();
        }
        let current = *online.iter().next_back().unwrap();
        fx.clock.set_now(current * PERIOD + offset);

        let eligible = fx.engine.calculate_eligible(&alice, &peer, POOL).unwrap();
        let completed = online.iter().filter(|p| **p < current).count() as u128;
        prop_assert_eq!(eligible, completed * 88);
    }
}
