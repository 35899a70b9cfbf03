//! Sliding-window rate limiter
//!
//! Bounds outbound calls to `max_requests` per trailing `window_ms`. State is
//! process-lifetime only; a restart empties the window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::Clock;

/// Point-in-time view of a limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Calls permitted per window
    pub max_requests: usize,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Calls recorded inside the current window
    pub in_window: usize,
    /// Milliseconds until a slot frees up (0 when one is free now)
    pub wait_ms: u64,
}

/// Tracks recent call timestamps and answers whether another call fits
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window_ms: u64,
    window: Duration,
    calls: Mutex<VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter allowing `max_requests` calls per `window_ms` milliseconds
    pub fn new(max_requests: usize, window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_ms,
            window: i64::try_from(window_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .unwrap_or(Duration::MAX),
            calls: Mutex::new(VecDeque::with_capacity(max_requests)),
            clock,
        }
    }

    /// Drops timestamps that fell out of the window ending at `now`
    fn prune(&self, calls: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let cutoff = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        while calls.front().is_some_and(|ts| *ts <= cutoff) {
            calls.pop_front();
        }
    }

    fn wait_for(&self, calls: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> StdDuration {
        if calls.len() < self.max_requests {
            return StdDuration::ZERO;
        }
        match calls.front() {
            // A negative remainder means the slot is already free
            Some(oldest) => {
                let frees_at = oldest
                    .checked_add_signed(self.window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                (frees_at - now).to_std().unwrap_or(StdDuration::ZERO)
            }
            None => StdDuration::ZERO,
        }
    }

    /// Returns whether a call made now would stay within the limit
    pub fn can_proceed(&self) -> bool {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        self.prune(&mut calls, now);
        calls.len() < self.max_requests
    }

    /// Returns how long until a slot frees up, zero if one is free now
    pub fn time_until_next_slot(&self) -> StdDuration {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        self.prune(&mut calls, now);
        self.wait_for(&calls, now)
    }

    /// Records one outbound call at the current instant
    ///
    /// Call exactly once per dispatched request, never for cache hits.
    pub fn record_call(&self) {
        let now = self.clock.now();
        self.calls.lock().push_back(now);
    }

    /// Records a call if a slot is free, in one step
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        self.prune(&mut calls, now);
        if calls.len() < self.max_requests {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Waits until a slot is free, then records the call
    ///
    /// Only meant for the burst-limited upstream. The wait is bounded by the
    /// window length; concurrent throttlers re-check after waking so the
    /// limit is never overshot.
    pub async fn throttle(&self) {
        loop {
            let wait = {
                let now = self.clock.now();
                let mut calls = self.calls.lock();
                self.prune(&mut calls, now);
                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    return;
                }
                self.wait_for(&calls, now)
            };
            log::debug!("rate limiter full, waiting {}ms", wait.as_millis());
            tokio::time::sleep(wait.max(StdDuration::from_millis(1))).await;
        }
    }

    /// Returns current limiter statistics
    pub fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        self.prune(&mut calls, now);
        LimiterStats {
            max_requests: self.max_requests,
            window_ms: self.window_ms,
            in_window: calls.len(),
            wait_ms: self.wait_for(&calls, now).as_millis() as u64,
        }
    }
}
