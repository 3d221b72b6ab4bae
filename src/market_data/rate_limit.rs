// =============================================================================
// Rate-Limit Tracker — keeps CoinGecko calls under the public budget
// =============================================================================
//
// The public CoinGecko tier allows roughly 30 calls per minute and answers
// anything beyond that with HTTP 429 and a `retry-after` header.
//
// We hold ourselves to a smaller per-minute budget and, once a 429 arrives,
// refuse to send anything until the advertised back-off has elapsed. All
// counters are atomics so any task may query them lock-free.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Self-imposed requests per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 25;
/// Back-off applied when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u32 = 60;
const WINDOW_MS: i64 = 60_000;

/// Thread-safe request budget tracker backed by atomic counters.
pub struct RateLimitTracker {
    budget_per_minute: u32,
    window_start_ms: AtomicI64,
    requests_in_window: AtomicU32,
    requests_total: AtomicU32,
    throttled_total: AtomicU32,
    last_retry_after_secs: AtomicU32,
    retry_after_until_ms: AtomicI64,
}

/// Serialisable view of the tracker for the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub budget_per_minute: u32,
    pub requests_in_window: u32,
    pub requests_total: u32,
    pub throttled_total: u32,
    pub last_retry_after_secs: u32,
    /// Seconds of back-off still outstanding, 0 when none.
    pub backoff_remaining_secs: u32,
}

impl RateLimitTracker {
    pub fn new(budget_per_minute: u32) -> Self {
        Self {
            budget_per_minute: budget_per_minute.max(1),
            window_start_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            requests_in_window: AtomicU32::new(0),
            requests_total: AtomicU32::new(0),
            throttled_total: AtomicU32::new(0),
            last_retry_after_secs: AtomicU32::new(0),
            retry_after_until_ms: AtomicI64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight checks
    // -------------------------------------------------------------------------

    /// Reserve one request slot. Returns `false`, without counting anything,
    /// when the per-minute budget is spent or a 429 back-off is active.
    ///
    /// The check and the increment are one compare-and-swap, so concurrent
    /// callers can never push the window past the budget.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now().timestamp_millis())
    }

    fn try_acquire_at(&self, now_ms: i64) -> bool {
        self.roll_window(now_ms);

        let until = self.retry_after_until_ms.load(Ordering::Acquire);
        if now_ms < until {
            warn!(
                backoff_remaining_ms = until - now_ms,
                "request blocked — provider asked us to back off"
            );
            return false;
        }

        let budget = self.budget_per_minute;
        match self
            .requests_in_window
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < budget).then_some(used + 1)
            }) {
            Ok(prev) => {
                self.requests_total.fetch_add(1, Ordering::Relaxed);
                debug!(used = prev + 1, budget, "request slot reserved");
                true
            }
            Err(used) => {
                warn!(used, budget, "request blocked — per-minute budget spent");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Response-based updates
    // -------------------------------------------------------------------------

    /// Inspect a response. A 429 starts a back-off for the advertised
    /// `retry-after` seconds.
    pub fn record_response(&self, status: StatusCode, headers: &HeaderMap) {
        if status != StatusCode::TOO_MANY_REQUESTS {
            return;
        }
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        self.record_throttled_at(retry_after, Utc::now().timestamp_millis());
    }

    fn record_throttled_at(&self, retry_after_secs: u32, now_ms: i64) {
        let total = self.throttled_total.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_retry_after_secs.store(retry_after_secs, Ordering::Relaxed);
        self.retry_after_until_ms
            .fetch_max(now_ms + retry_after_secs as i64 * 1000, Ordering::Relaxed);
        warn!(
            retry_after_secs,
            throttled_total = total,
            "provider returned 429 — backing off"
        );
    }

    /// Start a new one-minute window once the current one has elapsed.
    fn roll_window(&self, now_ms: i64) {
        let start = self.window_start_ms.load(Ordering::Relaxed);
        if now_ms - start >= WINDOW_MS
            && self
                .window_start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.requests_in_window.store(0, Ordering::Relaxed);
        }
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Utc::now().timestamp_millis())
    }

    fn snapshot_at(&self, now_ms: i64) -> RateLimitSnapshot {
        self.roll_window(now_ms);
        let until = self.retry_after_until_ms.load(Ordering::Relaxed);
        let remaining_ms = (until - now_ms).max(0);
        RateLimitSnapshot {
            budget_per_minute: self.budget_per_minute,
            requests_in_window: self.requests_in_window.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            throttled_total: self.throttled_total.load(Ordering::Relaxed),
            last_retry_after_secs: self.last_retry_after_secs.load(Ordering::Relaxed),
            backoff_remaining_secs: ((remaining_ms + 999) / 1000) as u32,
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("budget_per_minute", &self.budget_per_minute)
            .field("requests_in_window", &self.requests_in_window.load(Ordering::Relaxed))
            .field("throttled_total", &self.throttled_total.load(Ordering::Relaxed))
            .finish()
    }
}
