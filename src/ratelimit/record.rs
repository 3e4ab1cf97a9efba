//! Per-key window state and admission decisions.

use std::time::Duration;

/// Counter state for one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRecord {
    /// Requests counted in the current window
    pub count: u64,
    /// Absolute expiry of the current window, in epoch milliseconds
    pub window_end_ms: u64,
}

impl ThrottleRecord {
    /// Open a fresh window at `now_ms` with the first request counted.
    pub fn open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_end_ms: now_ms.saturating_add(window_ms),
        }
    }

    /// A window is expired strictly after its end; `now == window_end` still counts.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.window_end_ms
    }

    /// Time left until the window rolls over.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.window_end_ms.saturating_sub(now_ms))
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Admit,
    /// The caller's window is exhausted.
    Reject {
        /// Time until the caller's window rolls over
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}
