//! Big-endian composite keys so sled range scans follow numeric order.

use crate::StorageError;
use uptime_types::{AccountId, MonthIndex, PeerId, PeriodIndex, PoolId, SettlementKey};

pub const CURSOR_PREFIX: u8 = b'c';
pub const MONTH_PREFIX: u8 = b'm';
pub const ACCOUNT_PREFIX: u8 = b'a';
pub const SETTLED_PREFIX: u8 = b's';
pub const TOTALS_KEY: &[u8] = b"totals";

pub const BREAKER_KEY: &[u8] = b"circuit_breaker";
pub const SCHEMA_KEY: &[u8] = b"schema";
pub const PARAMS_KEY: &[u8] = b"params";

/// `pool | period`
pub fn ledger_prefix(pool: PoolId, period: PeriodIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&pool.to_be_bytes());
    key.extend_from_slice(&period.to_be_bytes());
    key
}

/// `pool | period | peer`
pub fn ledger_key(pool: PoolId, period: PeriodIndex, peer: &PeerId) -> Vec<u8> {
    let mut key = ledger_prefix(pool, period);
    key.extend_from_slice(peer);
    key
}

/// `'c' | account | peer | pool`
pub fn cursor_key(key: &SettlementKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(69);
    out.push(CURSOR_PREFIX);
    out.extend_from_slice(&key.account);
    out.extend_from_slice(&key.peer);
    out.extend_from_slice(&key.pool.to_be_bytes());
    out
}

/// `'m' | peer | pool | month`
pub fn month_key(peer: &PeerId, pool: PoolId, month: MonthIndex) -> Vec<u8> {
    let mut out = Vec::with_capacity(45);
    out.push(MONTH_PREFIX);
    out.extend_from_slice(peer);
    out.extend_from_slice(&pool.to_be_bytes());
    out.extend_from_slice(&month.to_be_bytes());
    out
}

/// `'s' | peer | pool`
pub fn settled_key(peer: &PeerId, pool: PoolId) -> Vec<u8> {
    let mut out = Vec::with_capacity(37);
    out.push(SETTLED_PREFIX);
    out.extend_from_slice(peer);
    out.extend_from_slice(&pool.to_be_bytes());
    out
}

/// `'a' | account`
pub fn account_key(account: &AccountId) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.push(ACCOUNT_PREFIX);
    out.extend_from_slice(account);
    out
}

/// `pool | peer`
pub fn legacy_key(pool: PoolId, peer: &PeerId) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&pool.to_be_bytes());
    key.extend_from_slice(peer);
    key
}

pub fn decode_u64(bytes: &[u8], what: &'static str) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Corrupt(what))?;
    Ok(u64::from_be_bytes(raw))
}

pub fn decode_u128(bytes: &[u8], what: &'static str) -> Result<u128, StorageError> {
    let raw: [u8; 16] = bytes.try_into().map_err(|_| StorageError::Corrupt(what))?;
    Ok(u128::from_be_bytes(raw))
}

pub fn decode_pool(bytes: &[u8]) -> Result<PoolId, StorageError> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(StorageError::Corrupt("pool id"))?;
    Ok(PoolId::from_be_bytes(raw))
}

pub fn decode_peer(bytes: &[u8]) -> Result<PeerId, StorageError> {
    bytes.try_into().map_err(|_| StorageError::Corrupt("peer id"))
}
