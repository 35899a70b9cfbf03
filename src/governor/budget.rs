//! Daily call budget
//!
//! Enforces a hard ceiling of calls per day for the quota-scarce upstream.
//! The counter resets in place at a fixed UTC hour; the reset is checked
//! lazily at the start of every operation, reads included.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::Clock;

/// Snapshot of the budget state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Budget {
    /// Calls allowed per period
    pub daily_limit: u32,
    /// Calls recorded in the current period
    pub used: u32,
    /// `daily_limit - used`
    pub remaining: u32,
    /// Next reset boundary, always in the future as of the last check
    pub reset_time: DateTime<Utc>,
}

/// Returns the first `reset_hour:00:00 UTC` strictly after `now`
pub fn next_reset_boundary(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(reset_hour.min(23), 0, 0).unwrap_or_default();
    let candidate = now.date_naive().and_time(at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// Tracks calls against a daily ceiling
#[derive(Debug)]
pub struct DailyBudget {
    reset_hour: u32,
    state: Mutex<Budget>,
    clock: Arc<dyn Clock>,
}

impl DailyBudget {
    /// Creates a budget of `daily_limit` calls resetting at `reset_hour` UTC
    pub fn new(daily_limit: u32, reset_hour: u32, clock: Arc<dyn Clock>) -> Self {
        let reset_time = next_reset_boundary(clock.now(), reset_hour);
        Self {
            reset_hour,
            state: Mutex::new(Budget {
                daily_limit,
                used: 0,
                remaining: daily_limit,
                reset_time,
            }),
            clock,
        }
    }

    /// Resets the counter if the boundary has passed
    fn check_reset(&self, state: &mut Budget) {
        let now = self.clock.now();
        if now >= state.reset_time {
            log::info!(
                "daily budget reset ({} of {} used in the previous period)",
                state.used,
                state.daily_limit
            );
            state.used = 0;
            state.remaining = state.daily_limit;
            state.reset_time = next_reset_boundary(now, self.reset_hour);
        }
    }

    fn record(state: &mut Budget) {
        state.used = (state.used + 1).min(state.daily_limit);
        state.remaining = state.daily_limit - state.used;
    }

    /// Returns whether another call is permitted this period
    pub fn can_call(&self) -> bool {
        let mut state = self.state.lock();
        self.check_reset(&mut state);
        state.remaining > 0
    }

    /// Records one dispatched call
    ///
    /// Call immediately before dispatch: an attempted call consumes quota
    /// whether or not the upstream succeeds.
    pub fn record_call(&self) {
        let mut state = self.state.lock();
        self.check_reset(&mut state);
        Self::record(&mut state);
    }

    /// Checks and records a call under one lock
    ///
    /// Returns the post-record snapshot when permitted, or the denying
    /// snapshot when the budget is exhausted.
    pub fn try_acquire(&self) -> Result<Budget, Budget> {
        let mut state = self.state.lock();
        self.check_reset(&mut state);
        if state.remaining == 0 {
            return Err(*state);
        }
        Self::record(&mut state);
        Ok(*state)
    }

    /// Returns a copy of the current state
    pub fn snapshot(&self) -> Budget {
        let mut state = self.state.lock();
        self.check_reset(&mut state);
        *state
    }
}
