//! Sled-backed reward store

use crate::keys::{
    account_key, cursor_key, decode_peer, decode_pool, decode_u128, decode_u64, ledger_key,
    ledger_prefix, legacy_key, month_key, settled_key, BREAKER_KEY, PARAMS_KEY, SCHEMA_KEY,
    TOTALS_KEY,
};
use crate::{RewardStore, StorageError};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::{Db, Tree};
use std::path::Path;
use uptime_types::{
    AccountId, BreakerState, DistributionTotals, LegacyAttendance, MonthIndex, PeerId,
    PeriodIndex, PoolId, RewardParams, SchemaState, Settlement, SettlementKey, Tokens,
};

const ONLINE_MARK: &[u8] = &[1];

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<StorageError>>;

fn abort<E: Into<StorageError>>(err: E) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err.into())
}

fn tx_get_u64(tx: &TransactionalTree, key: &[u8], what: &'static str) -> TxResult<Option<u64>> {
    match tx.get(key)? {
        Some(v) => decode_u64(&v, what).map(Some).map_err(abort),
        None => Ok(None),
    }
}

fn tx_get_u128(tx: &TransactionalTree, key: &[u8], what: &'static str) -> TxResult<u128> {
    match tx.get(key)? {
        Some(v) => decode_u128(&v, what).map_err(abort),
        None => Ok(0),
    }
}

/// Read-modify-write of the aggregate counters inside a transaction.
fn tx_update_totals(
    tx: &TransactionalTree,
    update: impl Fn(&mut DistributionTotals),
) -> TxResult<()> {
    let mut totals: DistributionTotals = match tx.get(TOTALS_KEY)? {
        Some(v) => serde_json::from_slice(&v).map_err(abort)?,
        None => DistributionTotals::default(),
    };
    update(&mut totals);
    let encoded = serde_json::to_vec(&totals).map_err(abort)?;
    tx.insert(TOTALS_KEY.to_vec(), encoded)?;
    Ok(())
}

/// Put `value` under `key`, or remove the key when there is none.
fn tx_restore_u64(tx: &TransactionalTree, key: Vec<u8>, value: Option<u64>) -> TxResult<()> {
    match value {
        Some(v) => {
            tx.insert(key, v.to_be_bytes().to_vec())?;
        }
        None => {
            tx.remove(key)?;
        }
    }
    Ok(())
}

fn finish_transaction(result: Result<(), TransactionError<StorageError>>) -> Result<()> {
    result.map_err(|err| match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Database(e),
    })?;
    Ok(())
}

/// Sled-backed implementation
pub struct SledRewardStore {
    db: Db,
    /// `(pool, period, peer)` online bits
    online: Tree,
    /// pools using the period ledger
    pools: Tree,
    /// cursors, cap counters and aggregates; one tree so a settlement
    /// commits in a single transaction
    settlement: Tree,
    metadata: Tree,
    legacy: Tree,
}

impl SledRewardStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let online = db.open_tree("online_status")?;
        let pools = db.open_tree("participating_pools")?;
        let settlement = db.open_tree("settlement")?;
        let metadata = db.open_tree("metadata")?;
        let legacy = db.open_tree("legacy_attendance")?;

        tracing::debug!(target: "storage", "Opened sled reward store");

        Ok(Self {
            db,
            online,
            pools,
            settlement,
            metadata,
            legacy,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.metadata
            .get(key)?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.metadata.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }
}

impl RewardStore for SledRewardStore {
    fn set_online(&self, pool: PoolId, period: PeriodIndex, peers: &[PeerId]) -> Result<usize> {
        let mut newly_set = 0;
        for peer in peers {
            let previous = self
                .online
                .insert(ledger_key(pool, period, peer), ONLINE_MARK.to_vec())?;
            if previous.is_none() {
                newly_set += 1;
            }
        }
        Ok(newly_set)
    }

    fn is_online(&self, pool: PoolId, period: PeriodIndex, peer: &PeerId) -> Result<bool> {
        Ok(self.online.contains_key(ledger_key(pool, period, peer))?)
    }

    fn online_peers(&self, pool: PoolId, period: PeriodIndex) -> Result<Vec<PeerId>> {
        let prefix = ledger_prefix(pool, period);
        let mut peers = Vec::new();
        for entry in self.online.scan_prefix(&prefix) {
            let (key, _) = entry?;
            peers.push(decode_peer(&key[prefix.len()..])?);
        }
        Ok(peers)
    }

    fn mark_pool_participating(&self, pool: PoolId) -> Result<bool> {
        let previous = self
            .pools
            .insert(pool.to_be_bytes().to_vec(), ONLINE_MARK.to_vec())?;
        Ok(previous.is_none())
    }

    fn is_pool_participating(&self, pool: PoolId) -> Result<bool> {
        Ok(self.pools.contains_key(pool.to_be_bytes())?)
    }

    fn get_cursor(&self, key: &SettlementKey) -> Result<Option<u64>> {
        self.settlement
            .get(cursor_key(key))?
            .map(|v| decode_u64(&v, "cursor"))
            .transpose()
            .map_err(Into::into)
    }

    fn get_month_paid(&self, peer: &PeerId, pool: PoolId, month: MonthIndex) -> Result<Tokens> {
        Ok(self
            .settlement
            .get(month_key(peer, pool, month))?
            .map(|v| decode_u128(&v, "monthly cap counter"))
            .transpose()?
            .unwrap_or(0))
    }

    fn get_account_claimed(&self, account: &AccountId) -> Result<Tokens> {
        Ok(self
            .settlement
            .get(account_key(account))?
            .map(|v| decode_u128(&v, "account claimed"))
            .transpose()?
            .unwrap_or(0))
    }

    fn get_totals(&self) -> Result<DistributionTotals> {
        Ok(self
            .settlement
            .get(TOTALS_KEY)?
            .map(|v| serde_json::from_slice(&v))
            .transpose()?
            .unwrap_or_default())
    }

    fn get_peer_settled(&self, peer: &PeerId, pool: PoolId) -> Result<Option<u64>> {
        self.settlement
            .get(settled_key(peer, pool))?
            .map(|v| decode_u64(&v, "settled-through mark"))
            .transpose()
            .map_err(Into::into)
    }

    fn apply_settlement(&self, s: &Settlement) -> Result<()> {
        let result: Result<(), TransactionError<StorageError>> =
            self.settlement.transaction(|tx| {
                tx.insert(cursor_key(&s.key), s.cursor.to_be_bytes().to_vec())?;

                let mark = settled_key(&s.key.peer, s.key.pool);
                let settled = tx_get_u64(tx, &mark, "settled-through mark")?.unwrap_or(0);
                tx.insert(mark, settled.max(s.cursor).to_be_bytes().to_vec())?;

                for total in &s.month_totals {
                    tx.insert(
                        month_key(&s.key.peer, s.key.pool, total.month),
                        total.paid.to_be_bytes().to_vec(),
                    )?;
                }

                if s.amount > 0 {
                    let key = account_key(&s.key.account);
                    let claimed = tx_get_u128(tx, &key, "account claimed")?;
                    tx.insert(key, claimed.saturating_add(s.amount).to_be_bytes().to_vec())?;
                }

                tx_update_totals(tx, |totals| totals.record(s.amount))
            });
        finish_transaction(result)
    }

    fn revert_settlement(&self, s: &Settlement) -> Result<()> {
        let result: Result<(), TransactionError<StorageError>> =
            self.settlement.transaction(|tx| {
                tx_restore_u64(tx, cursor_key(&s.key), s.prior.cursor)?;
                tx_restore_u64(tx, settled_key(&s.key.peer, s.key.pool), s.prior.peer_settled)?;

                for total in &s.prior.month_totals {
                    tx.insert(
                        month_key(&s.key.peer, s.key.pool, total.month),
                        total.paid.to_be_bytes().to_vec(),
                    )?;
                }

                if s.amount > 0 {
                    let key = account_key(&s.key.account);
                    let claimed = tx_get_u128(tx, &key, "account claimed")?;
                    tx.insert(key, claimed.saturating_sub(s.amount).to_be_bytes().to_vec())?;
                }

                tx_update_totals(tx, |totals| totals.unrecord(s.amount))
            });
        finish_transaction(result)
    }

    fn get_breaker(&self) -> Result<BreakerState> {
        Ok(self.get_json(BREAKER_KEY)?.unwrap_or_default())
    }

    fn put_breaker(&self, state: &BreakerState) -> Result<()> {
        self.put_json(BREAKER_KEY, state)
    }

    fn get_schema(&self) -> Result<SchemaState> {
        Ok(self.get_json(SCHEMA_KEY)?.unwrap_or_default())
    }

    fn put_schema(&self, state: &SchemaState) -> Result<()> {
        self.put_json(SCHEMA_KEY, state)
    }

    fn get_params(&self) -> Result<Option<RewardParams>> {
        self.get_json(PARAMS_KEY)
    }

    fn put_params(&self, params: &RewardParams) -> Result<()> {
        self.put_json(PARAMS_KEY, params)
    }

    fn put_legacy_attendance(&self, record: &LegacyAttendance) -> Result<()> {
        self.legacy.insert(
            legacy_key(record.pool, &record.peer),
            serde_json::to_vec(record)?,
        )?;
        Ok(())
    }

    fn get_legacy_attendance(
        &self,
        pool: PoolId,
        peer: &PeerId,
    ) -> Result<Option<LegacyAttendance>> {
        self.legacy
            .get(legacy_key(pool, peer))?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn legacy_pools(&self) -> Result<Vec<PoolId>> {
        let mut pools: Vec<PoolId> = Vec::new();
        for entry in self.legacy.iter() {
            let (key, _) = entry?;
            let pool = decode_pool(&key)?;
            if pools.last() != Some(&pool) {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    fn legacy_peers(&self, pool: PoolId) -> Result<Vec<PeerId>> {
        let mut peers = Vec::new();
        for entry in self.legacy.scan_prefix(pool.to_be_bytes()) {
            let (key, _) = entry?;
            peers.push(decode_peer(&key[4..])?);
        }
        Ok(peers)
    }
}
