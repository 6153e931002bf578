//! In-memory reward store for tests and ephemeral nodes

use crate::RewardStore;
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uptime_types::{
    AccountId, BreakerState, DistributionTotals, LegacyAttendance, MonthIndex, PeerId,
    PeriodIndex, PoolId, RewardParams, SchemaState, Settlement, SettlementKey, Tokens,
};

#[derive(Debug, Default)]
struct SettlementTables {
    cursors: HashMap<SettlementKey, u64>,
    peer_settled: HashMap<(PeerId, PoolId), u64>,
    month_paid: HashMap<(PeerId, PoolId, MonthIndex), Tokens>,
    account_claimed: HashMap<AccountId, Tokens>,
    totals: DistributionTotals,
}

#[derive(Debug, Default)]
struct Metadata {
    breaker: BreakerState,
    schema: SchemaState,
    params: Option<RewardParams>,
}

/// In-memory testing backend
#[derive(Debug, Clone, Default)]
pub struct MemoryRewardStore {
    online: Arc<RwLock<BTreeSet<(PoolId, PeriodIndex, PeerId)>>>,
    pools: Arc<RwLock<HashSet<PoolId>>>,
    settlement: Arc<RwLock<SettlementTables>>,
    metadata: Arc<RwLock<Metadata>>,
    legacy: Arc<RwLock<BTreeMap<(PoolId, PeerId), LegacyAttendance>>>,
}

impl MemoryRewardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of online bits recorded across all pools and periods.
    pub fn online_record_count(&self) -> usize {
        self.online.read().len()
    }
}

impl RewardStore for MemoryRewardStore {
    fn set_online(&self, pool: PoolId, period: PeriodIndex, peers: &[PeerId]) -> Result<usize> {
        let mut online = self.online.write();
        Ok(peers
            .iter()
            .filter(|peer| online.insert((pool, period, **peer)))
            .count())
    }

    fn is_online(&self, pool: PoolId, period: PeriodIndex, peer: &PeerId) -> Result<bool> {
        Ok(self.online.read().contains(&(pool, period, *peer)))
    }

    fn online_peers(&self, pool: PoolId, period: PeriodIndex) -> Result<Vec<PeerId>> {
        Ok(self
            .online
            .read()
            .range((pool, period, [0u8; 32])..=(pool, period, [u8::MAX; 32]))
            .map(|(_, _, peer)| *peer)
            .collect())
    }

    fn mark_pool_participating(&self, pool: PoolId) -> Result<bool> {
        Ok(self.pools.write().insert(pool))
    }

    fn is_pool_participating(&self, pool: PoolId) -> Result<bool> {
        Ok(self.pools.read().contains(&pool))
    }

    fn get_cursor(&self, key: &SettlementKey) -> Result<Option<u64>> {
        Ok(self.settlement.read().cursors.get(key).copied())
    }

    fn get_peer_settled(&self, peer: &PeerId, pool: PoolId) -> Result<Option<u64>> {
        Ok(self.settlement.read().peer_settled.get(&(*peer, pool)).copied())
    }

    fn get_month_paid(&self, peer: &PeerId, pool: PoolId, month: MonthIndex) -> Result<Tokens> {
        Ok(self
            .settlement
            .read()
            .month_paid
            .get(&(*peer, pool, month))
            .copied()
            .unwrap_or(0))
    }

    fn get_account_claimed(&self, account: &AccountId) -> Result<Tokens> {
        Ok(self
            .settlement
            .read()
            .account_claimed
            .get(account)
            .copied()
            .unwrap_or(0))
    }

    fn get_totals(&self) -> Result<DistributionTotals> {
        Ok(self.settlement.read().totals)
    }

    fn apply_settlement(&self, s: &Settlement) -> Result<()> {
        let mut tables = self.settlement.write();
        tables.cursors.insert(s.key, s.cursor);
        let settled = tables.peer_settled.entry((s.key.peer, s.key.pool)).or_insert(0);
        *settled = (*settled).max(s.cursor);
        for total in &s.month_totals {
            tables
                .month_paid
                .insert((s.key.peer, s.key.pool, total.month), total.paid);
        }
        if s.amount > 0 {
            let claimed = tables.account_claimed.entry(s.key.account).or_insert(0);
            *claimed = claimed.saturating_add(s.amount);
        }
        tables.totals.record(s.amount);
        Ok(())
    }

    fn revert_settlement(&self, s: &Settlement) -> Result<()> {
        let mut tables = self.settlement.write();
        match s.prior.cursor {
            Some(cursor) => tables.cursors.insert(s.key, cursor),
            None => tables.cursors.remove(&s.key),
        };
        let peer = (s.key.peer, s.key.pool);
        match s.prior.peer_settled {
            Some(settled) => tables.peer_settled.insert(peer, settled),
            None => tables.peer_settled.remove(&peer),
        };
        for total in &s.prior.month_totals {
            tables
                .month_paid
                .insert((s.key.peer, s.key.pool, total.month), total.paid);
        }
        if s.amount > 0 {
            if let Some(claimed) = tables.account_claimed.get_mut(&s.key.account) {
                *claimed = claimed.saturating_sub(s.amount);
            }
        }
        tables.totals.unrecord(s.amount);
        Ok(())
    }

    fn get_breaker(&self) -> Result<BreakerState> {
        Ok(self.metadata.read().breaker)
    }

    fn put_breaker(&self, state: &BreakerState) -> Result<()> {
        self.metadata.write().breaker = *state;
        Ok(())
    }

    fn get_schema(&self) -> Result<SchemaState> {
        Ok(self.metadata.read().schema)
    }

    fn put_schema(&self, state: &SchemaState) -> Result<()> {
        self.metadata.write().schema = *state;
        Ok(())
    }

    fn get_params(&self) -> Result<Option<RewardParams>> {
        Ok(self.metadata.read().params.clone())
    }

    fn put_params(&self, params: &RewardParams) -> Result<()> {
        self.metadata.write().params = Some(params.clone());
        Ok(())
    }

    fn put_legacy_attendance(&self, record: &LegacyAttendance) -> Result<()> {
        self.legacy
            .write()
            .insert((record.pool, record.peer), record.clone());
        Ok(())
    }

    fn get_legacy_attendance(
        &self,
        pool: PoolId,
        peer: &PeerId,
    ) -> Result<Option<LegacyAttendance>> {
        Ok(self.legacy.read().get(&(pool, *peer)).cloned())
    }

    fn legacy_pools(&self) -> Result<Vec<PoolId>> {
        let mut pools: Vec<PoolId> = self.legacy.read().keys().map(|(pool, _)| *pool).collect();
        pools.dedup();
        Ok(pools)
    }

    fn legacy_peers(&self, pool: PoolId) -> Result<Vec<PeerId>> {
        Ok(self
            .legacy
            .read()
            .keys()
            .filter(|(p, _)| *p == pool)
            .map(|(_, peer)| *peer)
            .collect())
    }
}
