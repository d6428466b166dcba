//! Monotonic deadline arithmetic for probe and poll timeouts.

use std::time::{Duration, Instant};

/// An absolute point on the monotonic clock.
///
/// Poll timeouts are derived from the remaining time, truncated to whole
/// milliseconds and clamped at zero, so a deadline in the past always yields
/// an immediate poll rather than an infinite one.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Push the deadline further into the future.
    ///
    /// Extensions are additive on the absolute deadline, so repeated
    /// extensions accumulate regardless of how much time has elapsed.
    pub fn extend(&mut self, extra: Duration) {
        self.at += extra;
    }

    /// Remaining time in milliseconds, clamped at zero.
    pub fn remaining_ms(&self) -> i32 {
        let remaining = self.at.saturating_duration_since(Instant::now());
        remaining.as_millis().min(i32::MAX as u128) as i32
    }
}

/// A finite duration as a poll timeout in milliseconds.
pub fn poll_millis(timeout: Duration) -> i32 {
    timeout.as_millis().min(i32::MAX as u128) as i32
}
