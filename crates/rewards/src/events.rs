//! Engine events
//!
//! Every state-changing operation appends an event to a bounded in-memory
//! log. The node exposes the log for inspection; nothing in the engine
//! reads it back.

use parking_lot::RwLock;
use std::collections::VecDeque;
use uptime_types::{AccountId, PeerId, PeriodIndex, PoolId, Tokens};

/// Events kept by default.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardEvent {
    OnlineStatusSubmitted {
        pool: PoolId,
        submitter: AccountId,
        period: PeriodIndex,
        submitted: usize,
        newly_online: usize,
    },
    RewardClaimed {
        account: AccountId,
        peer: PeerId,
        pool: PoolId,
        amount: Tokens,
        periods_paid: u64,
        cursor: u64,
    },
    CircuitBreakerTripped {
        by: AccountId,
        height: u64,
    },
    /// `by` is `None` when the cooldown elapsed on its own.
    CircuitBreakerReset {
        by: Option<AccountId>,
        height: u64,
    },
    ParamsUpdated {
        by: AccountId,
        fields: Vec<&'static str>,
    },
    LegacyImported {
        pool: PoolId,
        peer: PeerId,
        timestamps: usize,
    },
    MigrationProgress {
        migrated: u64,
        completed: bool,
    },
    EmergencyWithdrawal {
        by: AccountId,
        pool: PoolId,
        to: AccountId,
        amount: Tokens,
    },
}

/// Ring buffer of the most recent events.
#[derive(Debug)]
pub struct EventLog {
    events: RwLock<VecDeque<RewardEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, event: RewardEvent) {
        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<RewardEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
