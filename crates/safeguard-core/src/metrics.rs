//! Observability hooks for guard decisions.
//!
//! Metrics are fire-and-forget: sinks are called synchronously on the
//! decision path but never affect control flow and must not block or fail.
//! Every callback has a no-op default body, so a sink implements only the
//! events it cares about. [`NoopSafeguardMetrics`] is the mandatory
//! default; [`CounterMetrics`] keeps lock-free counters for tests and
//! simple telemetry.
//!
//! # Memory Ordering
//!
//! [`CounterMetrics`] uses `Ordering::Relaxed` throughout: each counter is
//! independent and monotonically increasing, and `snapshot()` tolerates
//! counters that are momentarily inconsistent relative to each other —
//! telemetry operates on time-aggregated data where sub-microsecond
//! ordering is irrelevant. Stronger orderings would add barrier overhead
//! without providing multi-counter consistency.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Fire-and-forget counters on guard decisions, keyed by the logical
/// key's `(namespace, value)` pair.
pub trait SafeguardMetrics: Send + Sync {
    /// A rate-limit check denied admission.
    fn on_rate_limit_blocked(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// A cooldown acquisition found an active flag.
    fn on_cooldown_blocked(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// A cooldown flag was released on the rollback path.
    fn on_cooldown_rolled_back(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// A cached SUCCESS record was replayed.
    fn on_idem_hit(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// No record existed; the caller acquired the key.
    fn on_idem_miss(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// A duplicate call collided with an in-flight one.
    fn on_idem_conflict(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }

    /// An attempt was rejected by an existing lock.
    fn on_attempt_blocked(&self, namespace: &str, key: &str, lock_ttl: Duration) {
        let _ = (namespace, key, lock_ttl);
    }

    /// A failure exhausted the window and locked the key.
    fn on_attempt_locked(&self, namespace: &str, key: &str, lock_ttl: Duration) {
        let _ = (namespace, key, lock_ttl);
    }

    /// A success cleared the failure window.
    fn on_attempt_reset(&self, namespace: &str, key: &str) {
        let _ = (namespace, key);
    }
}

/// The mandatory do-nothing sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSafeguardMetrics;

impl SafeguardMetrics for NoopSafeguardMetrics {}

/// Lock-free event counters with a snapshot view.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    rate_limit_blocked: AtomicU64,
    cooldown_blocked: AtomicU64,
    cooldown_rolled_back: AtomicU64,
    idem_hit: AtomicU64,
    idem_miss: AtomicU64,
    idem_conflict: AtomicU64,
    attempt_blocked: AtomicU64,
    attempt_locked: AtomicU64,
    attempt_reset: AtomicU64,
}

/// Point-in-time view of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Rate-limit denials.
    pub rate_limit_blocked: u64,
    /// Cooldown denials.
    pub cooldown_blocked: u64,
    /// Cooldown rollbacks.
    pub cooldown_rolled_back: u64,
    /// Idempotency replays.
    pub idem_hit: u64,
    /// Fresh idempotency acquisitions.
    pub idem_miss: u64,
    /// Idempotency conflicts.
    pub idem_conflict: u64,
    /// Attempts rejected by an existing lock.
    pub attempt_blocked: u64,
    /// Failures that locked a key.
    pub attempt_locked: u64,
    /// Successes that cleared a window.
    pub attempt_reset: u64,
}

impl CounterMetrics {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a point-in-time view of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rate_limit_blocked: self.rate_limit_blocked.load(Ordering::Relaxed),
            cooldown_blocked: self.cooldown_blocked.load(Ordering::Relaxed),
            cooldown_rolled_back: self.cooldown_rolled_back.load(Ordering::Relaxed),
            idem_hit: self.idem_hit.load(Ordering::Relaxed),
            idem_miss: self.idem_miss.load(Ordering::Relaxed),
            idem_conflict: self.idem_conflict.load(Ordering::Relaxed),
            attempt_blocked: self.attempt_blocked.load(Ordering::Relaxed),
            attempt_locked: self.attempt_locked.load(Ordering::Relaxed),
            attempt_reset: self.attempt_reset.load(Ordering::Relaxed),
        }
    }
}

impl SafeguardMetrics for CounterMetrics {
    fn on_rate_limit_blocked(&self, _namespace: &str, _key: &str) {
        self.rate_limit_blocked.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cooldown_blocked(&self, _namespace: &str, _key: &str) {
        self.cooldown_blocked.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cooldown_rolled_back(&self, _namespace: &str, _key: &str) {
        self.cooldown_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    fn on_idem_hit(&self, _namespace: &str, _key: &str) {
        self.idem_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn on_idem_miss(&self, _namespace: &str, _key: &str) {
        self.idem_miss.fetch_add(1, Ordering::Relaxed);
    }

    fn on_idem_conflict(&self, _namespace: &str, _key: &str) {
        self.idem_conflict.fetch_add(1, Ordering::Relaxed);
    }

    fn on_attempt_blocked(&self, _namespace: &str, _key: &str, _lock_ttl: Duration) {
        self.attempt_blocked.fetch_add(1, Ordering::Relaxed);
    }

    fn on_attempt_locked(&self, _namespace: &str, _key: &str, _lock_ttl: Duration) {
        self.attempt_locked.fetch_add(1, Ordering::Relaxed);
    }

    fn on_attempt_reset(&self, _namespace: &str, _key: &str) {
        self.attempt_reset.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = CounterMetrics::new();
        metrics.on_rate_limit_blocked("ns", "k");
        metrics.on_rate_limit_blocked("ns", "k");
        metrics.on_idem_hit("ns", "k");
        metrics.on_attempt_locked("ns", "k", Duration::from_secs(60));

        let snap = metrics.snapshot();
        assert_eq!(snap.rate_limit_blocked, 2);
        assert_eq!(snap.idem_hit, 1);
        assert_eq!(snap.attempt_locked, 1);
        assert_eq!(snap.cooldown_blocked, 0);
    }

    #[test]
    fn noop_sink_accepts_all_events() {
        let metrics = NoopSafeguardMetrics;
        metrics.on_cooldown_blocked("ns", "k");
        metrics.on_idem_conflict("ns", "k");
        metrics.on_attempt_reset("ns", "k");
    }
}
