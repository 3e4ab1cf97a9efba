//! Core fixed-window limiter implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::clock::{Clock, SystemClock};
use super::record::{Decision, ThrottleRecord};

/// Default window length in milliseconds.
const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Default requests admitted per window.
const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default period between sweeps of expired records.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Construction parameters for a [`FixedWindowLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Length of a counting window in milliseconds
    pub window_ms: u64,
    /// Maximum requests admitted per key within one window
    pub max_requests: u64,
    /// Period of the background sweep
    pub sweep_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Handle to a running sweep task.
struct SweepTask {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-key fixed-window request limiter.
///
/// Each key gets a window that opens on its first request and lasts
/// `window_ms`. Up to `max_requests` are admitted inside the window; later
/// requests are rejected until the window has passed, at which point the
/// next request opens a new one. Requests straddling a window edge can see
/// up to twice the limit in a short interval.
///
/// The limiter is thread-safe and meant to be shared behind an `Arc`.
/// Background cleanup only runs between [`start`](Self::start) and
/// [`stop`](Self::stop).
pub struct FixedWindowLimiter {
    /// Counter state indexed by client key
    registry: DashMap<String, ThrottleRecord>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<SweepTask>>,
}

impl FixedWindowLimiter {
    /// Create a limiter reading the system clock.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter with an injected time source.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: DashMap::new(),
            config,
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Decide whether a request from `key` may proceed, counting it if so.
    ///
    /// Never blocks on I/O or awaits; a rejected request leaves the record
    /// untouched.
    pub fn admit(&self, key: &str) -> Decision {
        let now = self.clock.now_millis();

        trace!(key = %key, "Checking rate limit");

        match self.registry.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(ThrottleRecord::open(now, self.config.window_ms));
                Decision::Admit
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if record.is_expired(now) {
                    *record = ThrottleRecord::open(now, self.config.window_ms);
                    Decision::Admit
                } else if record.count >= self.config.max_requests {
                    debug!(
                        key = %key,
                        count = record.count,
                        window_end_ms = record.window_end_ms,
                        "Rate limit exceeded"
                    );
                    Decision::Reject {
                        retry_after: record.remaining(now),
                    }
                } else {
                    record.count += 1;
                    Decision::Admit
                }
            }
        }
    }

    /// Drop every record whose window has passed.
    ///
    /// Returns the number of records removed. Active windows are never touched.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;

        self.registry.retain(|_, record| {
            if record.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            info!(removed = removed, remaining = self.registry.len(), "Swept expired rate limit records");
        }
        removed
    }

    /// Begin sweeping on the configured interval.
    ///
    /// Must be called from within a Tokio runtime. The first sweep happens one
    /// full interval after the call. Calling this on a running limiter does
    /// nothing.
    ///
    /// # Panics
    ///
    /// Panics if `sweep_interval` is zero.
    pub fn start(self: &Arc<Self>) {
        let period = self.config.sweep_interval;
        assert!(!period.is_zero(), "sweep_interval must be positive");

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            warn!("Rate limiter sweep already running");
            return;
        }

        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let limiter = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else { break };
                        limiter.sweep();
                    }
                }
            }
        });

        info!(
            window_ms = self.config.window_ms,
            max_requests = self.config.max_requests,
            sweep_interval_secs = period.as_secs(),
            "Rate limiter started"
        );
        *sweeper = Some(SweepTask { cancel, handle });
    }

    /// Cancel the sweep and release all counter state.
    ///
    /// Once this returns no further sweep will run and the registry is empty.
    pub async fn stop(&self) {
        let task = self.sweeper.lock().take();

        if let Some(task) = task {
            let _ = task.cancel.send(());
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Rate limiter sweep task ended abnormally");
            }
        }

        let cleared = self.registry.len();
        self.registry.clear();
        info!(cleared = cleared, "Rate limiter stopped");
    }

    /// Whether the background sweep is scheduled.
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Count for `key` in its current window, if that window is still open.
    pub fn count_for(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_millis();
        self.registry
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count)
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// The limiter's construction parameters.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}

impl Drop for FixedWindowLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.handle.abort();
        }
    }
}
