//! Reclamation of expired windows and stale violation marks.
//!
//! A sweep runs either every N admission checks (see
//! [`LimiterSettings::sweep_every`](super::LimiterSettings)) or on a timer via
//! [`spawn_periodic_sweeper`]. Both paths go through [`sweep`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::limiter::RateLimiter;
use super::store::WindowStore;

/// Drop every timestamp at or before `now_millis - window_millis`, delete keys
/// left empty, and prune violation marks older than the suppression interval.
pub fn sweep<S: WindowStore>(limiter: &RateLimiter<S>, window_millis: u64, now_millis: i64) {
    let cutoff = now_millis.saturating_sub(i64::try_from(window_millis).unwrap_or(i64::MAX));
    let keys_before = limiter.store.size();
    let mut pruned = 0usize;

    limiter.store.retain(|_, timestamps| {
        let before = timestamps.len();
        timestamps.retain(|&t| t > cutoff);
        pruned += before - timestamps.len();
        !timestamps.is_empty()
    });

    let marks_pruned = limiter.violations.prune(now_millis);

    debug!(
        keys_removed = keys_before.saturating_sub(limiter.store.size()),
        timestamps_pruned = pruned,
        marks_pruned = marks_pruned,
        "Swept rate limit windows"
    );
}

/// Run [`sweep`] every `interval` until `shutdown` resolves.
///
/// An alternative to the count trigger for deployments that prefer a
/// background task; the sweep itself is the same.
pub fn spawn_periodic_sweeper<S, F>(
    limiter: Arc<RateLimiter<S>>,
    interval: Duration,
    window_millis: u64,
    shutdown: F,
) -> JoinHandle<()>
where
    S: WindowStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_ms = interval.as_millis() as u64,
            window_ms = window_millis,
            "Periodic sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Periodic sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let window = window_millis.max(limiter.widest_window_millis());
                    limiter.sweep(window, limiter.now_millis());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::limiter::LimiterSettings;
    use crate::ratelimit::policy::RateLimitPolicy;
    use crate::ratelimit::store::MemoryWindowStore;
    use crate::ratelimit::violation::tests::RecordingSink;

    fn limiter_at(clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_parts(
            MemoryWindowStore::new(),
            Arc::new(clock.clone()),
            Arc::new(RecordingSink::default()),
            LimiterSettings {
                sweep_every: 0,
                ..LimiterSettings::default()
            },
        )
    }

    #[test]
    fn test_sweep_keeps_only_live_timestamps() {
        let limiter = limiter_at(&ManualClock::new(0));
        limiter.store.set("A:test", vec![100, 500, 1_200, 1_800]);
        limiter.store.set("B:test", vec![100, 200]);

        limiter.sweep(1_000, 2_000);

        assert_eq!(limiter.store.get("A:test"), vec![1_200, 1_800]);
        assert_eq!(limiter.store.get("B:test"), Vec::<i64>::new());
        assert_eq!(limiter.size(), 1);
    }

    #[test]
    fn test_sweep_boundary_timestamp_is_removed() {
        let limiter = limiter_at(&ManualClock::new(0));
        limiter.store.set("A:test", vec![1_000, 1_001]);

        limiter.sweep(1_000, 2_000);
        assert_eq!(limiter.store.get("A:test"), vec![1_001]);
    }

    #[test]
    fn test_sweep_prunes_violation_marks() {
        let limiter = limiter_at(&ManualClock::new(0));
        let policy = RateLimitPolicy::new("test", 1, 1_000);

        limiter.evaluate("A", &policy, 0);
        limiter.evaluate("A", &policy, 0);
        assert_eq!(limiter.violation_marks(), 1);

        limiter.sweep(1_000, 1_800_000);
        assert_eq!(limiter.violation_marks(), 1);
        assert_eq!(limiter.size(), 0);

        limiter.sweep(1_000, 3_600_001);
        assert_eq!(limiter.violation_marks(), 0);
    }

    #[tokio::test]
    async fn test_periodic_sweeper_reclaims_and_stops() {
        let clock = ManualClock::new(0);
        let limiter = Arc::new(limiter_at(&clock));
        let policy = RateLimitPolicy::new("test", 5, 1_000);
        limiter.evaluate("A", &policy, 0);
        assert_eq!(limiter.size(), 1);

        clock.set(10_000);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = spawn_periodic_sweeper(
            limiter.clone(),
            Duration::from_millis(10),
            1_000,
            async move {
                let _ = rx.await;
            },
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.size(), 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
