//! Eligibility calculator
//!
//! Walks completed periods from a participant's settlement cursor, paying
//! `reward_per_period` for each online one against that period's monthly
//! cap counter. The walk is shared by the read-only views and by claims;
//! only claims persist its result.

use crate::engine::RewardEngine;
use crate::errors::Result;
use crate::ledger::OnlineView;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uptime_types::{
    AccountId, MonthIndex, MonthTotal, PeerId, PeriodClock, PeriodIndex, PoolId, RewardParams,
    SettlementKey, Tokens,
};

/// Completed, unsettled periods of one settlement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SettlementWindow {
    pub key: SettlementKey,
    pub cursor: Option<u64>,
    /// Settled-through mark of the participant across all owners
    pub peer_settled: Option<u64>,
    /// First period past the cursor, the settled-through mark and the
    /// effective start
    pub start: PeriodIndex,
    /// Period in progress; excluded
    pub end: PeriodIndex,
}

impl SettlementWindow {
    pub fn unsettled_periods(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Outcome of walking a settlement window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Accrual {
    pub amount: Tokens,
    /// First period not settled by this walk
    pub next_period: PeriodIndex,
    pub examined: u64,
    pub paid_periods: u64,
    /// New cap counter values for every month paid into
    pub month_totals: BTreeMap<MonthIndex, Tokens>,
    /// Stored cap counter values of the same months before the walk
    pub prior_month_totals: BTreeMap<MonthIndex, Tokens>,
    /// Month whose cap stopped the walk
    pub cap_hit: Option<MonthIndex>,
}

fn to_month_totals(totals: &BTreeMap<MonthIndex, Tokens>) -> Vec<MonthTotal> {
    totals
        .iter()
        .map(|(month, paid)| MonthTotal {
            month: *month,
            paid: *paid,
        })
        .collect()
}

impl Accrual {
    pub fn month_totals(&self) -> Vec<MonthTotal> {
        to_month_totals(&self.month_totals)
    }

    pub fn prior_month_totals(&self) -> Vec<MonthTotal> {
        to_month_totals(&self.prior_month_totals)
    }
}

/// Claim progress of one settlement key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    /// Settled-through timestamp, if any claim has run
    pub cursor: Option<u64>,
    /// Completed periods after the cursor
    pub unclaimed_periods: u64,
    /// Online periods among the first view window of unclaimed ones
    pub online_unclaimed: u64,
    /// Amount a claim over the view window would pay now
    pub eligible_amount: Tokens,
    pub default_periods_per_claim: u64,
    pub max_periods_per_claim: u64,
    /// More unclaimed periods than one default claim examines
    pub has_more: bool,
    pub pool_participating: bool,
}

impl RewardEngine {
    /// Amount `account` could claim for `peer` right now, over at most one
    /// view window. Never mutates state.
    pub fn calculate_eligible(
        &self,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
    ) -> Result<Tokens> {
        let params = self.params();
        self.ensure_operational(&params)?;
        let clock = params.period_clock()?;

        let window = self.settlement_window(&params, &clock, account, peer, pool)?;
        let view = self.online_view(&clock, pool, peer)?;
        let accrual = self.accrue(&params, &clock, &view, &window, params.view_window_periods)?;
        Ok(accrual.amount)
    }

    pub fn claim_status(
        &self,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
    ) -> Result<ClaimStatus> {
        let params = self.params();
        self.ensure_operational(&params)?;
        let clock = params.period_clock()?;

        let window = self.settlement_window(&params, &clock, account, peer, pool)?;
        let view = self.online_view(&clock, pool, peer)?;
        let accrual = self.accrue(&params, &clock, &view, &window, params.view_window_periods)?;

        let visible_end = window
            .end
            .min(window.start.saturating_add(params.view_window_periods));
        let mut online_unclaimed = 0;
        for period in window.start..visible_end {
            if view.is_online(period)? {
                online_unclaimed += 1;
            }
        }

        let unclaimed_periods = window.unsettled_periods();
        Ok(ClaimStatus {
            cursor: window.cursor,
            unclaimed_periods,
            online_unclaimed,
            eligible_amount: accrual.amount,
            default_periods_per_claim: params.default_periods_per_claim,
            max_periods_per_claim: params.max_periods_per_claim,
            has_more: unclaimed_periods > params.default_periods_per_claim,
            pool_participating: self.store.is_pool_participating(pool)?,
        })
    }

    /// Storage-usage rewards are not paid by this engine.
    pub fn calculate_storage_reward(
        &self,
        _account: &AccountId,
        _peer: &PeerId,
        _pool: PoolId,
    ) -> Tokens {
        0
    }

    /// Resolve the unsettled window for `(account, peer, pool)` after
    /// checking current ownership.
    ///
    /// A new owner starts after whatever earlier owners already settled
    /// for the participant, not from the join time.
    pub(crate) fn settlement_window(
        &self,
        params: &RewardParams,
        clock: &PeriodClock,
        account: &AccountId,
        peer: &PeerId,
        pool: PoolId,
    ) -> Result<SettlementWindow> {
        let membership = self.require_owner(account, peer, pool)?;
        let key = SettlementKey::new(*account, *peer, pool);
        let cursor = self.store.get_cursor(&key)?;
        let peer_settled = self.store.get_peer_settled(peer, pool)?;

        let effective_start = membership.joined_at.max(params.reward_start_time);
        let start_ts = cursor
            .unwrap_or(0)
            .max(peer_settled.unwrap_or(0))
            .max(effective_start);

        Ok(SettlementWindow {
            key,
            cursor,
            peer_settled,
            start: clock.period_index_of(start_ts),
            end: clock.period_index_of(self.clock.now()),
        })
    }

    /// Walk at most `limit` periods of `window`.
    ///
    /// An online period that would push its month past `monthly_cap` ends
    /// the walk without being settled, so it stays claimable.
    pub(crate) fn accrue(
        &self,
        params: &RewardParams,
        clock: &PeriodClock,
        view: &OnlineView<'_>,
        window: &SettlementWindow,
        limit: u64,
    ) -> Result<Accrual> {
        let per_period = clock.reward_per_period(params.reward_rate_per_month);
        let key = &window.key;
        let mut accrual = Accrual {
            next_period: window.start,
            ..Default::default()
        };

        while accrual.next_period < window.end && accrual.examined < limit {
            let period = accrual.next_period;

            if view.is_online(period)? {
                let month = clock.month_of_period(period);
                let paid = match accrual.month_totals.get(&month) {
                    Some(paid) => *paid,
                    None => self.store.get_month_paid(&key.peer, key.pool, month)?,
                };
                let after = paid.saturating_add(per_period);
                if after > params.monthly_cap {
                    accrual.cap_hit = Some(month);
                    break;
                }
                accrual.prior_month_totals.entry(month).or_insert(paid);
                accrual.month_totals.insert(month, after);
                accrual.amount = accrual.amount.saturating_add(per_period);
                accrual.paid_periods += 1;
            }

            accrual.examined += 1;
            accrual.next_period += 1;
        }

        Ok(accrual)
    }
}
