//! Settlement / claim processor
//!
//! A claim settles at most `max_periods` completed periods past the
//! cursor. The new cursor, cap counters and aggregates are persisted in
//! one store write before custody pays out; a failed transfer reverts that
//! write, so every counter ends where it started.

use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::events::RewardEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uptime_types::{AccountId, MonthIndex, PeerId, PoolId, Settlement, SettlementPrior, Tokens};

/// Outcome of one claim. A zero `amount` is a successful no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub amount: Tokens,
    pub periods_examined: u64,
    pub periods_paid: u64,
    /// Settled-through timestamp after the claim
    pub cursor: Option<u64>,
    /// Month whose cap stopped this claim early
    pub cap_reached: Option<MonthIndex>,
    /// Completed periods still past the cursor
    pub remaining_periods: u64,
}

impl RewardEngine {
    /// Settle up to `max_periods` periods for `peer`. `0` or anything above
    /// `max_periods_per_claim` uses `default_periods_per_claim`.
    ///
    /// A period blocked by its month's cap stays unsettled until the cap
    /// is raised. Its counter is keyed by the month the period starts in,
    /// so a later month rolling over does not reopen room for it.
    pub fn claim(
        &self,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
        max_periods: u64,
    ) -> Result<ClaimReceipt> {
        let params = self.params();
        self.ensure_operational(&params)?;
        let clock = params.period_clock()?;

        let lock = self.claim_lock(pool, peer);
        let _held = lock.lock();

        let window = self.settlement_window(&params, &clock, account, peer, pool)?;
        let limit = params.effective_claim_periods(max_periods);
        let view = self.online_view(&clock, pool, peer)?;
        let accrual = self.accrue(&params, &clock, &view, &window, limit)?;

        let cursor = if accrual.examined > 0 {
            let settled = clock.period_start(accrual.next_period);
            Some(window.cursor.map_or(settled, |c| c.max(settled)))
        } else {
            window.cursor
        };

        if let Some(month) = accrual.cap_hit {
            warn!(
                target: "rewards",
                pool,
                peer = %hex::encode(peer),
                month,
                "Monthly cap reached; claim stopped before an unpaid period"
            );
        }

        let settlement = Settlement {
            key: window.key,
            cursor: cursor.unwrap_or(0),
            month_totals: accrual.month_totals(),
            amount: accrual.amount,
            prior: SettlementPrior {
                cursor: window.cursor,
                peer_settled: window.peer_settled,
                month_totals: accrual.prior_month_totals(),
            },
        };
        if cursor.is_some() || accrual.amount > 0 {
            self.store.apply_settlement(&settlement)?;
        }

        if accrual.amount > 0 {
            if let Err(err) = self.custody.transfer(pool, account, accrual.amount) {
                warn!(
                    target: "rewards",
                    pool,
                    amount = %accrual.amount,
                    error = %err,
                    "Reward transfer failed; reverting settlement"
                );
                metrics::counter!("uptime_claim_transfer_failures_total").increment(1);
                if let Err(revert_err) = self.store.revert_settlement(&settlement) {
                    // Periods stay settled without payment; never paid twice.
                    error!(
                        target: "rewards",
                        pool,
                        peer = %hex::encode(peer),
                        amount = %accrual.amount,
                        error = %revert_err,
                        "Settlement revert failed after transfer failure"
                    );
                    metrics::counter!("uptime_settlement_revert_failures_total").increment(1);
                }
                return Err(RewardError::Transfer(err));
            }
        }

        metrics::counter!("uptime_claims_total").increment(1);
        metrics::counter!("uptime_rewards_distributed_total")
            .increment(u64::try_from(accrual.amount).unwrap_or(u64::MAX));

        if accrual.amount > 0 {
            info!(
                target: "rewards",
                pool,
                account = %hex::encode(account),
                peer = %hex::encode(peer),
                amount = %accrual.amount,
                periods = accrual.paid_periods,
                "Reward claimed"
            );
        } else {
            debug!(
                target: "rewards",
                pool,
                peer = %hex::encode(peer),
                examined = accrual.examined,
                "Claim settled nothing"
            );
        }

        self.record(RewardEvent::RewardClaimed {
            account: *account,
            peer: *peer,
            pool,
            amount: accrual.amount,
            periods_paid: accrual.paid_periods,
            cursor: settlement.cursor,
        });

        let resumed_at = window.start.saturating_add(accrual.examined);
        Ok(ClaimReceipt {
            amount: accrual.amount,
            periods_examined: accrual.examined,
            periods_paid: accrual.paid_periods,
            cursor,
            cap_reached: accrual.cap_hit,
            remaining_periods: window.end.saturating_sub(resumed_at),
        })
    }

    /// `claim` with `default_periods_per_claim`.
    pub fn claim_default(
        &self,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
    ) -> Result<ClaimReceipt> {
        let periods = self.params.read().default_periods_per_claim;
        self.claim(account, peer, pool, periods)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{test_id, Harness, PERIOD, POOL};
    use crate::{ErrorKind, RewardError, RewardEvent};
    use uptime_storage::RewardStore;
    use uptime_types::SettlementKey;

    #[test]
    fn claim_pays_then_second_claim_is_empty() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..90);
        harness.clock.set_now(90 * PERIOD);

        let receipt = harness.engine.claim_default(&harness.alice, &peer, POOL).unwrap();
        assert_eq!(receipt.amount, 7_920);
        assert_eq!(receipt.periods_paid, 90);
        assert_eq!(receipt.cursor, Some(90 * PERIOD));
        assert_eq!(harness.custody.total_transferred(), 7_920);

        let again = harness.engine.claim_default(&harness.alice, &peer, POOL).unwrap();
        assert_eq!(again.amount, 0);
        assert_eq!(again.periods_examined, 0);
        assert_eq!(harness.custody.calls().len(), 1);

        let totals = harness.engine.totals().unwrap();
        assert_eq!(totals.total_distributed, 7_920);
        assert_eq!(harness.engine.account_claimed(&harness.alice).unwrap(), 7_920);
        assert!(matches!(
            harness.engine.events().recent(1)[0],
            RewardEvent::RewardClaimed { amount: 0, .. }
        ));
    }

    #[test]
    fn offline_gap_advances_cursor_without_payout() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 200..210);
        harness.clock.set_now(210 * PERIOD);

        let first = harness.engine.claim(&harness.alice, &peer, POOL, 150).unwrap();
        assert_eq!(first.amount, 0);
        assert_eq!(first.cursor, Some(150 * PERIOD));
        assert_eq!(first.remaining_periods, 60);
        assert!(harness.custody.calls().is_empty());

        let second = harness.engine.claim(&harness.alice, &peer, POOL, 150).unwrap();
        assert_eq!(second.amount, 10 * 88);
        assert_eq!(second.cursor, Some(210 * PERIOD));
    }

    #[test]
    fn claim_size_is_clamped() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.clock.set_now(1_000 * PERIOD);

        let receipt = harness.engine.claim(&harness.alice, &peer, POOL, 0).unwrap();
        assert_eq!(receipt.periods_examined, 90);
        let receipt = harness.engine.claim(&harness.alice, &peer, POOL, 10_000).unwrap();
        assert_eq!(receipt.periods_examined, 90);
        let receipt = harness.engine.claim(&harness.alice, &peer, POOL, 540).unwrap();
        assert_eq!(receipt.periods_examined, 540);
    }

    #[test]
    fn failed_transfer_leaves_state_untouched() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..90);
        harness.clock.set_now(90 * PERIOD);
        harness.custody.fail_transfers("reserve drained");

        let err = harness.engine.claim_default(&harness.alice, &peer, POOL).unwrap_err();
        assert!(matches!(err, RewardError::Transfer(_)));
        assert_eq!(err.kind(), ErrorKind::Resource);

        let key = SettlementKey::new(harness.alice, peer, POOL);
        assert_eq!(harness.store.get_cursor(&key).unwrap(), None);
        assert_eq!(harness.store.get_peer_settled(&peer, POOL).unwrap(), None);
        assert_eq!(harness.store.get_month_paid(&peer, POOL, 0).unwrap(), 0);
        assert_eq!(harness.engine.totals().unwrap().total_claims, 0);
        assert_eq!(harness.engine.account_claimed(&harness.alice).unwrap(), 0);

        harness.custody.accept_transfers();
        let receipt = harness.engine.claim_default(&harness.alice, &peer, POOL).unwrap();
        assert_eq!(receipt.amount, 7_920);
    }

    #[test]
    fn failed_transfer_restores_earlier_settlement() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..40);
        harness.clock.set_now(40 * PERIOD);

        let first = harness.engine.claim(&harness.alice, &peer, POOL, 10).unwrap();
        assert_eq!(first.amount, 880);

        harness.custody.fail_transfers("reserve drained");
        harness
            .engine
            .claim(&harness.alice, &peer, POOL, 30)
            .unwrap_err();

        let key = SettlementKey::new(harness.alice, peer, POOL);
        assert_eq!(harness.store.get_cursor(&key).unwrap(), Some(10 * PERIOD));
        assert_eq!(
            harness.store.get_peer_settled(&peer, POOL).unwrap(),
            Some(10 * PERIOD)
        );
        assert_eq!(harness.store.get_month_paid(&peer, POOL, 0).unwrap(), 880);
        let totals = harness.engine.totals().unwrap();
        assert_eq!(totals.total_distributed, 880);
        assert_eq!(totals.total_claims, 1);
        assert_eq!(harness.engine.account_claimed(&harness.alice).unwrap(), 880);

        harness.custody.accept_transfers();
        let rest = harness.engine.claim(&harness.alice, &peer, POOL, 30).unwrap();
        assert_eq!(rest.amount, 30 * 88);
        assert_eq!(harness.custody.total_transferred(), 40 * 88);
    }

    #[test]
    fn new_owner_starts_after_previous_settlement() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        let bob = test_id("bob");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..30);
        harness.clock.set_now(20 * PERIOD);

        let alice = harness.engine.claim_default(&harness.alice, &peer, POOL).unwrap();
        assert_eq!(alice.amount, 20 * 88);

        harness.membership.transfer_peer(POOL, &peer, bob);
        let repeat = harness.engine.claim_default(&bob, &peer, POOL).unwrap();
        assert_eq!(repeat.amount, 0);
        assert_eq!(repeat.periods_examined, 0);

        harness.clock.set_now(30 * PERIOD);
        let fresh = harness.engine.claim_default(&bob, &peer, POOL).unwrap();
        assert_eq!(fresh.amount, 10 * 88);
        assert_eq!(fresh.cursor, Some(30 * PERIOD));
        assert_eq!(harness.custody.total_transferred(), 30 * 88);
        assert_eq!(harness.store.get_month_paid(&peer, POOL, 0).unwrap(), 30 * 88);
    }

    #[test]
    fn cap_hit_keeps_unpaid_period_claimable() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..20);
        harness.clock.set_now(20 * PERIOD);
        harness.engine.set_monthly_cap(&harness.admin, 5 * 88).unwrap();

        let first = harness.engine.claim(&harness.alice, &peer, POOL, 20).unwrap();
        assert_eq!(first.amount, 5 * 88);
        assert_eq!(first.cap_reached, Some(0));
        assert_eq!(first.cursor, Some(5 * PERIOD));

        let blocked = harness.engine.claim(&harness.alice, &peer, POOL, 20).unwrap();
        assert_eq!(blocked.amount, 0);
        assert_eq!(blocked.cursor, Some(5 * PERIOD));
        assert_eq!(harness.store.get_month_paid(&peer, POOL, 0).unwrap(), 5 * 88);

        harness.engine.set_monthly_cap(&harness.admin, 96_000).unwrap();
        let rest = harness.engine.claim(&harness.alice, &peer, POOL, 20).unwrap();
        assert_eq!(rest.amount, 15 * 88);
        assert_eq!(rest.cursor, Some(20 * PERIOD));
    }

    #[test]
    fn non_owner_cannot_claim() {
        let harness = Harness::new();
        let peer = test_id("peer-1");
        harness.join(peer, harness.alice, 0);
        harness.mark_online(&peer, 0..5);
        harness.clock.set_now(5 * PERIOD);

        let err = harness
            .engine
            .claim(&test_id("mallory"), &peer, POOL, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Membership);
        assert!(harness.custody.calls().is_empty());
    }
}
