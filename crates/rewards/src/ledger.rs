//! Online-status ledger
//!
//! Records `(pool, period, peer)` online bits from the pool's authorized
//! submitter. Bits are set-once: resubmitting is a no-op and submissions
//! commute, so concurrent submitters need no locking beyond the store.

use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::events::RewardEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uptime_storage::RewardStore;
use uptime_types::{AccountId, PeerId, PeriodClock, PeriodIndex, PoolId};

/// Outcome of one accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub pool: PoolId,
    pub period: PeriodIndex,
    pub submitted: usize,
    /// Bits that were not already set
    pub newly_online: usize,
}

impl RewardEngine {
    /// Record `peers` of `pool` as online during the period containing
    /// `timestamp`.
    pub fn submit_online_status(
        &self,
        caller: &AccountId,
        pool: PoolId,
        peers: &[PeerId],
        timestamp: u64,
    ) -> Result<SubmissionReceipt> {
        // Held for the whole submission so the period length cannot change
        // between deriving the period and writing the bit.
        let params = self.params.read();
        self.ensure_operational(&params)?;

        match self.membership.pool_submitter(pool) {
            Some(submitter) if submitter == *caller => {}
            Some(_) => {
                return Err(RewardError::NotPoolSubmitter {
                    pool,
                    account: *caller,
                })
            }
            None => return Err(RewardError::UnknownPool(pool)),
        }

        let now = self.clock.now();
        let earliest = now.saturating_sub(params.submission_window_secs).max(1);
        if timestamp == 0 || timestamp < earliest || timestamp > now {
            return Err(RewardError::InvalidTimestamp {
                timestamp,
                earliest,
                latest: now,
            });
        }

        if peers.is_empty() || peers.len() > params.max_batch_size as usize {
            return Err(RewardError::InvalidBatchSize {
                size: peers.len(),
                max: params.max_batch_size,
            });
        }

        let period = params.period_clock()?.period_index_of(timestamp);
        let newly_online = self.store.set_online(pool, period, peers)?;

        if self.store.mark_pool_participating(pool)? {
            info!(target: "rewards", pool, "Pool started using the period ledger");
        }
        self.mark_ledger_in_use()?;

        metrics::counter!("uptime_online_submissions_total").increment(1);
        metrics::counter!("uptime_online_bits_set_total").increment(newly_online as u64);

        debug!(
            target: "rewards",
            pool,
            period,
            submitted = peers.len(),
            newly_online,
            "Online status recorded"
        );

        self.record(RewardEvent::OnlineStatusSubmitted {
            pool,
            submitter: *caller,
            period,
            submitted: peers.len(),
            newly_online,
        });

        Ok(SubmissionReceipt {
            pool,
            period,
            submitted: peers.len(),
            newly_online,
        })
    }

    /// Whether `peer` was recorded online in `period`, including
    /// not-yet-migrated legacy attendance.
    pub fn is_online(&self, pool: PoolId, period: PeriodIndex, peer: &PeerId) -> Result<bool> {
        let clock = self.params.read().period_clock()?;
        self.online_view(&clock, pool, peer)?.is_online(period)
    }

    /// Online periods of `peer` in `[from, to)`, at most one view window.
    pub fn online_periods(
        &self,
        pool: PoolId,
        peer: &PeerId,
        from: PeriodIndex,
        to: PeriodIndex,
    ) -> Result<Vec<PeriodIndex>> {
        let params = self.params();
        let clock = params.period_clock()?;
        let view = self.online_view(&clock, pool, peer)?;
        let to = to.min(from.saturating_add(params.view_window_periods));

        let mut online = Vec::new();
        for period in from..to {
            if view.is_online(period)? {
                online.push(period);
            }
        }
        Ok(online)
    }

    /// Peers with a period-ledger bit for `(pool, period)`.
    pub fn online_peers(&self, pool: PoolId, period: PeriodIndex) -> Result<Vec<PeerId>> {
        Ok(self.store.online_peers(pool, period)?)
    }

    pub fn is_pool_participating(&self, pool: PoolId) -> Result<bool> {
        Ok(self.store.is_pool_participating(pool)?)
    }

    /// Ledger reader for one participant. Falls back to the legacy
    /// attendance record while the pool still has unmigrated entries.
    pub(crate) fn online_view(
        &self,
        clock: &PeriodClock,
        pool: PoolId,
        peer: &PeerId,
    ) -> Result<OnlineView<'_>> {
        let mut legacy_periods = BTreeSet::new();
        if self.legacy_pending(pool)? {
            if let Some(record) = self.store.get_legacy_attendance(pool, peer)? {
                legacy_periods.extend(
                    record
                        .online_timestamps
                        .iter()
                        .map(|ts| clock.period_index_of(*ts)),
                );
            }
        }

        Ok(OnlineView {
            store: self.store.as_ref(),
            pool,
            peer: *peer,
            legacy_periods,
        })
    }
}

pub(crate) struct OnlineView<'a> {
    store: &'a dyn RewardStore,
    pool: PoolId,
    peer: PeerId,
    legacy_periods: BTreeSet<PeriodIndex>,
}

impl OnlineView<'_> {
    pub(crate) fn is_online(&self, period: PeriodIndex) -> Result<bool> {
        if self.legacy_periods.contains(&period) {
            return Ok(true);
        }
        Ok(self.store.is_online(self.pool, period, &self.peer)?)
    }
}
