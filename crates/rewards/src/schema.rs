//! Schema guard and legacy ledger migration
//!
//! The legacy layout (schema v1) kept raw online timestamps per
//! participant. Migration converts it to `(pool, period, peer)` bits in
//! bounded batches, advancing a two-level cursor (pool position, then
//! participant position within that pool) over the sorted legacy records.
//! Until a pool is fully migrated, ledger reads for it also consult its
//! legacy records.

use crate::collaborators::Role;
use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::events::RewardEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uptime_types::{
    AccountId, LegacyAttendance, MigrationCursor, PeerId, PoolId, CURRENT_SCHEMA_VERSION,
    LEGACY_SCHEMA_VERSION,
};

/// Result of one `migrate_legacy` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Participants converted by this call
    pub migrated: u64,
    /// Online bits newly written by this call
    pub bits_written: u64,
    pub cursor: MigrationCursor,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub schema_version: u32,
    pub cursor: MigrationCursor,
    pub legacy_pools: Vec<PoolId>,
    /// Whether schema-affecting parameters are frozen
    pub schema_locked: bool,
}

impl RewardEngine {
    /// Note that ledger data exists under the current schema version.
    pub(crate) fn mark_ledger_in_use(&self) -> Result<()> {
        if self.store.get_schema()?.schema_locked() {
            return Ok(());
        }

        let _guard = self.metadata_lock.lock();
        let mut schema = self.store.get_schema()?;
        if !schema.schema_locked() {
            schema.ledger_in_use_since = Some(schema.version);
            self.store.put_schema(&schema)?;
            info!(
                target: "rewards",
                schema_version = schema.version,
                "Ledger in use; period length is now frozen"
            );
        }
        Ok(())
    }

    /// Whether `pool` still has legacy records the migration has not
    /// reached.
    pub(crate) fn legacy_pending(&self, pool: PoolId) -> Result<bool> {
        let schema = self.store.get_schema()?;
        if schema.migration.completed || schema.version != LEGACY_SCHEMA_VERSION {
            return Ok(false);
        }
        let pools = self.store.legacy_pools()?;
        Ok(match pools.binary_search(&pool) {
            Ok(position) => position as u64 >= schema.migration.pool_position,
            Err(_) => false,
        })
    }

    /// Load a legacy attendance record (admin only). Switches the engine
    /// to the legacy schema until migration completes.
    pub fn import_legacy_attendance(
        &self,
        caller: &AccountId,
        record: LegacyAttendance,
    ) -> Result<()> {
        self.require_role(caller, Role::Admin)?;

        let _guard = self.metadata_lock.lock();
        let mut schema = self.store.get_schema()?;
        if schema.version == CURRENT_SCHEMA_VERSION && schema.migration.completed {
            return Err(RewardError::MigrationComplete);
        }
        if schema.migration.pool_position > 0 || schema.migration.peer_position > 0 {
            return Err(RewardError::InvalidParameter(
                "legacy records cannot be imported once migration has started".to_string(),
            ));
        }

        self.store.put_legacy_attendance(&record)?;
        if schema.version != LEGACY_SCHEMA_VERSION {
            schema.version = LEGACY_SCHEMA_VERSION;
            if schema.ledger_in_use_since.is_some() {
                schema.ledger_in_use_since = Some(LEGACY_SCHEMA_VERSION);
            }
            self.store.put_schema(&schema)?;
        }

        debug!(
            target: "rewards",
            pool = record.pool,
            timestamps = record.online_timestamps.len(),
            "Legacy attendance imported"
        );
        self.record(RewardEvent::LegacyImported {
            pool: record.pool,
            peer: record.peer,
            timestamps: record.online_timestamps.len(),
        });
        Ok(())
    }

    /// Convert up to `max_participants` legacy records (admin only).
    ///
    /// `0` uses `max_batch_size`. Calls after completion are no-ops.
    pub fn migrate_legacy(
        &self,
        caller: &AccountId,
        max_participants: u64,
    ) -> Result<MigrationReport> {
        self.require_role(caller, Role::Admin)?;
        let params = self.params.read();
        self.ensure_operational(&params)?;

        let budget = match max_participants {
            0 => u64::from(params.max_batch_size),
            n => n.min(u64::from(params.max_batch_size)),
        };
        let clock = params.period_clock()?;

        let _guard = self.metadata_lock.lock();
        let mut schema = self.store.get_schema()?;
        if schema.migration.completed || schema.version != LEGACY_SCHEMA_VERSION {
            return Ok(MigrationReport {
                migrated: 0,
                bits_written: 0,
                cursor: schema.migration,
                schema_version: schema.version,
            });
        }

        let pools = self.store.legacy_pools()?;
        let mut cursor = schema.migration;
        let mut migrated = 0u64;
        let mut bits_written = 0u64;
        let mut current: Option<(PoolId, Vec<PeerId>)> = None;

        loop {
            let Some(&pool) = pools.get(cursor.pool_position as usize) else {
                cursor.completed = true;
                break;
            };
            if current.as_ref().map(|(p, _)| *p) != Some(pool) {
                current = Some((pool, self.store.legacy_peers(pool)?));
            }
            let peers = current.as_ref().map(|(_, peers)| peers.as_slice()).unwrap_or(&[]);

            let Some(peer) = peers.get(cursor.peer_position as usize) else {
                cursor.pool_position += 1;
                cursor.peer_position = 0;
                continue;
            };
            // Stop only at a record boundary so the cursor never splits one.
            if migrated == budget {
                break;
            }

            if let Some(record) = self.store.get_legacy_attendance(pool, peer)? {
                let periods: BTreeSet<_> = record
                    .online_timestamps
                    .iter()
                    .map(|ts| clock.period_index_of(*ts))
                    .collect();
                for period in periods {
                    bits_written += self.store.set_online(pool, period, &[*peer])? as u64;
                }
                self.store.mark_pool_participating(pool)?;
            }

            cursor.peer_position += 1;
            cursor.migrated_participants += 1;
            migrated += 1;
        }

        schema.migration = cursor;
        if cursor.completed {
            schema.version = CURRENT_SCHEMA_VERSION;
            if bits_written > 0 || schema.ledger_in_use_since.is_some() {
                schema.ledger_in_use_since = Some(CURRENT_SCHEMA_VERSION);
            }
        } else if bits_written > 0 && schema.ledger_in_use_since.is_none() {
            schema.ledger_in_use_since = Some(schema.version);
        }
        self.store.put_schema(&schema)?;

        metrics::counter!("uptime_migrated_participants_total").increment(migrated);
        info!(
            target: "rewards",
            migrated,
            bits_written,
            pool_position = cursor.pool_position,
            peer_position = cursor.peer_position,
            completed = cursor.completed,
            "Legacy migration batch applied"
        );
        self.record(RewardEvent::MigrationProgress {
            migrated,
            completed: cursor.completed,
        });

        Ok(MigrationReport {
            migrated,
            bits_written,
            cursor,
            schema_version: schema.version,
        })
    }

    pub fn migration_status(&self) -> Result<MigrationStatus> {
        let schema = self.store.get_schema()?;
        Ok(MigrationStatus {
            schema_version: schema.version,
            cursor: schema.migration,
            legacy_pools: self.store.legacy_pools()?,
            schema_locked: schema.schema_locked(),
        })
    }
}
