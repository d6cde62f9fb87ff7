//! Sliding-window admission evaluator.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::identity::CallerIdentity;
use super::policy::RateLimitPolicy;
use super::store::{MemoryWindowStore, WindowStore};
use super::sweeper;
use super::violation::{TracingSink, ViolationReporter, ViolationSink, DEFAULT_SUPPRESSION};

/// Requests between count-triggered sweeps.
pub const DEFAULT_SWEEP_EVERY: u64 = 100;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationResult {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Admissions in the window before this request
    pub current: u64,
    pub limit: u64,
    /// Admissions left after this one, never negative
    pub remaining: u64,
    /// Epoch seconds when the oldest retained admission leaves the window
    pub reset_at: i64,
    /// Seconds until the window has room again, at least 1
    pub retry_after: u64,
}

/// Tunables for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Sweep after this many checks; 0 disables the count trigger
    pub sweep_every: u64,
    /// Minimum gap between violation warnings per identity
    pub violation_suppression: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            sweep_every: DEFAULT_SWEEP_EVERY,
            violation_suppression: DEFAULT_SUPPRESSION,
        }
    }
}

/// Per-process sliding-window rate limiter.
///
/// Thread-safe; share it behind an `Arc`. Each key's read-modify-write runs
/// under the store's per-key exclusion, and a sweep takes the same locks.
#[derive(Debug)]
pub struct RateLimiter<S: WindowStore = MemoryWindowStore> {
    /// Admission timestamps keyed by `identity:endpoint`
    pub(crate) store: S,
    pub(crate) violations: ViolationReporter,
    clock: Arc<dyn Clock>,
    requests_since_sweep: AtomicU64,
    sweep_every: u64,
    /// Longest policy window evaluated so far; count-triggered sweeps use it
    widest_window: AtomicU64,
}

impl RateLimiter<MemoryWindowStore> {
    /// Create a rate limiter with default settings, the system clock and
    /// warnings routed to `tracing`.
    pub fn new() -> Self {
        Self::with_settings(LimiterSettings::default())
    }

    /// Create an in-memory rate limiter with custom settings.
    pub fn with_settings(settings: LimiterSettings) -> Self {
        Self::with_parts(
            MemoryWindowStore::new(),
            Arc::new(SystemClock::new()),
            Arc::new(TracingSink),
            settings,
        )
    }
}

impl Default for RateLimiter<MemoryWindowStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: WindowStore> RateLimiter<S> {
    /// Assemble a limiter from explicit collaborators.
    pub fn with_parts(
        store: S,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ViolationSink>,
        settings: LimiterSettings,
    ) -> Self {
        Self {
            store,
            violations: ViolationReporter::new(sink, settings.violation_suppression),
            clock,
            requests_since_sweep: AtomicU64::new(0),
            sweep_every: settings.sweep_every,
            widest_window: AtomicU64::new(0),
        }
    }

    /// Check `identity` against `policy` at the current clock time.
    pub fn check(&self, identity: &CallerIdentity, policy: &RateLimitPolicy) -> EvaluationResult {
        let now = self.clock.now_millis();
        self.evaluate(&identity.to_string(), policy, now)
    }

    /// Decide admission for `identity` under `policy` at `now_millis`.
    ///
    /// Admitted requests append `now_millis` to the key's window. Denied
    /// requests leave the store untouched and may emit a violation warning.
    pub fn evaluate(
        &self,
        identity: &str,
        policy: &RateLimitPolicy,
        now_millis: i64,
    ) -> EvaluationResult {
        self.widest_window
            .fetch_max(policy.window_millis, Ordering::SeqCst);

        let key = window_key(identity, &policy.endpoint_class);
        let window = window_millis(policy);
        let window_start = now_millis.saturating_sub(window);

        let result = self.store.update(&key, |timestamps| {
            let retained: Vec<i64> = timestamps
                .iter()
                .copied()
                .filter(|&t| t > window_start)
                .collect();

            let result = compute_result(&retained, policy, now_millis);
            if result.allowed {
                if retained.is_empty() {
                    debug!(key = %key, limit = policy.limit, "Opening new window");
                }
                *timestamps = retained;
                timestamps.push(now_millis);
            }
            result
        });

        trace!(
            key = %key,
            allowed = result.allowed,
            current = result.current,
            limit = result.limit,
            "Evaluated admission"
        );

        if !result.allowed {
            self.violations.report_if_due(
                identity,
                &policy.endpoint_class,
                result.current,
                result.limit,
                result.retry_after,
                now_millis,
            );
        }

        self.maybe_sweep(now_millis);
        result
    }

    /// Count the retained admissions for a key without recording anything.
    pub fn peek(&self, identity: &str, policy: &RateLimitPolicy, now_millis: i64) -> u64 {
        let window_start = now_millis.saturating_sub(window_millis(policy));
        self.store
            .get(&window_key(identity, &policy.endpoint_class))
            .into_iter()
            .filter(|&t| t > window_start)
            .count() as u64
    }

    /// Drop expired timestamps and stale violation marks.
    pub fn sweep(&self, window_millis: u64, now_millis: i64) {
        sweeper::sweep(self, window_millis, now_millis);
    }

    /// Longest window of any policy this limiter has evaluated.
    ///
    /// Sweeping with anything shorter could drop timestamps another policy
    /// still counts.
    pub fn widest_window_millis(&self) -> u64 {
        self.widest_window.load(Ordering::SeqCst)
    }

    /// Current time according to this limiter's clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Number of live window keys.
    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Number of identities with a live violation mark.
    pub fn violation_marks(&self) -> usize {
        self.violations.len()
    }

    /// Clear all windows, violation marks and the sweep counter.
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self) {
        self.store.clear();
        self.violations.clear();
        self.requests_since_sweep.store(0, Ordering::SeqCst);
    }

    fn maybe_sweep(&self, now_millis: i64) {
        if self.sweep_every == 0 {
            return;
        }

        let seen = self.requests_since_sweep.fetch_add(1, Ordering::SeqCst) + 1;
        if seen >= self.sweep_every
            && self
                .requests_since_sweep
                .compare_exchange(seen, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.sweep(self.widest_window_millis(), now_millis);
        }
    }
}

/// Store key for an identity under an endpoint class.
pub fn window_key(identity: &str, endpoint_class: &str) -> String {
    format!("{}:{}", identity, endpoint_class)
}

fn window_millis(policy: &RateLimitPolicy) -> i64 {
    i64::try_from(policy.window_millis).unwrap_or(i64::MAX)
}

/// Derive the decision and header metadata from the retained window.
fn compute_result(retained: &[i64], policy: &RateLimitPolicy, now_millis: i64) -> EvaluationResult {
    let current = retained.len() as u64;
    let allowed = current < policy.limit;
    let remaining = policy.limit.saturating_sub(current).saturating_sub(1);

    let oldest = retained.first().copied().unwrap_or(now_millis);
    let frees_at = oldest.saturating_add(window_millis(policy));
    let reset_at = ceil_seconds(frees_at);
    let retry_after = ceil_seconds(frees_at.saturating_sub(now_millis)).max(1) as u64;

    EvaluationResult {
        allowed,
        current,
        limit: policy.limit,
        remaining,
        reset_at,
        retry_after,
    }
}

fn ceil_seconds(millis: i64) -> i64 {
    millis.saturating_add(999).div_euclid(1000)
}
