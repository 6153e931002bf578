// src/clock.rs
//
// Execution clock. Supplies "now" in unix seconds and a monotonic
// execution height (the block-number analogue the circuit breaker counts
// its cooldown in).

use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ==== CONSTANTS ====

/// Default spacing between execution heights for [`SystemClock`].
pub const DEFAULT_BLOCK_INTERVAL_SECS: u64 = 12;

// ==== TRAIT ====

/// Source of wall-clock time and execution height.
pub trait Clock: Send + Sync {
    /// Current time in unix seconds.
    fn now(&self) -> u64;

    /// Current execution height. Never decreases.
    fn height(&self) -> u64;
}

// ==== SYSTEM CLOCK ====

#[derive(Debug, Default)]
struct ClockState {
    last_now: u64,
    last_height: u64,
}

/// Wall-clock backed [`Clock`]; height advances once per block interval.
#[derive(Debug)]
pub struct SystemClock {
    block_interval_secs: u64,
    state: Mutex<ClockState>,
}

impl SystemClock {
    pub fn new(block_interval_secs: u64) -> Self {
        Self {
            block_interval_secs: block_interval_secs.max(1),
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn block_interval_secs(&self) -> u64 {
        self.block_interval_secs
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_INTERVAL_SECS)
    }
}

fn system_time_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let mut state = self.state.lock();
        // Never hand out a timestamp older than one already observed.
        let candidate = system_time_now_secs().max(state.last_now);
        state.last_now = candidate;
        candidate
    }

    fn height(&self) -> u64 {
        let now = self.now();
        let mut state = self.state.lock();
        let candidate = (now / self.block_interval_secs).max(state.last_height);
        state.last_height = candidate;
        candidate
    }
}

// ==== MANUAL CLOCK ====

/// Settable [`Clock`] for tests, simulations and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ClockState>,
}

impl ManualClock {
    pub fn new(now: u64, height: u64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                last_now: now,
                last_height: height,
            }),
        }
    }

    pub fn set_now(&self, now: u64) {
        self.state.lock().last_now = now;
    }

    pub fn set_height(&self, height: u64) {
        let mut state = self.state.lock();
        state.last_height = state.last_height.max(height);
    }

    pub fn advance_secs(&self, secs: u64) {
        let mut state = self.state.lock();
        state.last_now = state.last_now.saturating_add(secs);
    }

    pub fn advance_blocks(&self, blocks: u64) {
        let mut state = self.state.lock();
        state.last_height = state.last_height.saturating_add(blocks);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.state.lock().last_now
    }

    fn height(&self) -> u64 {
        self.state.lock().last_height
    }
}

// ==== TESTS ====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::default();
        let mut readings = Vec::new();
        for _ in 0..10 {
            readings.push((clock.now(), clock.height()));
        }
        for window in readings.windows(2) {
            assert!(window[1].0 >= window[0].0);
            assert!(window[1].1 >= window[0].1);
        }
    }

    #[test]
    fn system_clock_height_tracks_block_interval() {
        let clock = SystemClock::new(10);
        let now = clock.now();
        let height = clock.height();
        assert!(height >= now / 10);
    }

    #[test]
    fn zero_block_interval_is_clamped() {
        assert_eq!(SystemClock::new(0).block_interval_secs(), 1);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000, 5);
        clock.advance_secs(500);
        clock.advance_blocks(3);
        assert_eq!(clock.now(), 1_500);
        assert_eq!(clock.height(), 8);
    }

    #[test]
    fn manual_clock_height_never_rewinds() {
        let clock = ManualClock::new(0, 100);
        clock.set_height(10);
        assert_eq!(clock.height(), 100);
    }
}
