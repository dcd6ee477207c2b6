//! In-memory guard implementations.
//!
//! These implementations keep all state in process memory behind
//! [`parking_lot::Mutex`] maps, with expiry evaluated lazily on access.
//! They are primarily intended for tests and single-process deployments:
//! the mutex serializes per-store access, which provides the same per-key
//! linearizability the shared store provides in distributed deployments.
//!
//! # Limitations
//!
//! - State is not shared across processes and is lost on exit.
//! - Buckets and windows are retained until the process exits; there is no
//!   background reclamation of idle keys.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::SafeguardResult,
    guard::{AttemptLimitManager, CooldownGuard, IdempotencyManager, RateLimiter},
    key::Key,
    model::{AttemptCheck, CooldownTicket, IdempotencyRecord, IdempotencyStatus, RateLimitResult},
    policy::{AttemptPolicy, CooldownPolicy, IdempotencyPolicy, RateLimitPolicy},
};

/// State of a single token bucket.
#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

impl BucketState {
    fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self { tokens: policy.capacity(), last_refill: now }
    }

    /// Applies whole-period refill: `last_refill` advances by the consumed
    /// periods rather than jumping to `now`, so fractional progress toward
    /// the next token is never lost.
    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let period_ms = policy.refill_period().as_millis().max(1);
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis();
        let periods = elapsed_ms / period_ms;
        if periods == 0 {
            return;
        }

        let refilled = (u128::from(self.tokens))
            .saturating_add(periods.saturating_mul(u128::from(policy.refill_tokens())))
            .min(u128::from(policy.capacity()));
        // min() bounds the value by capacity, so the narrowing cannot fail
        self.tokens = u64::try_from(refilled).unwrap_or(policy.capacity());

        let advance_ms = u64::try_from(periods.saturating_mul(period_ms)).unwrap_or(u64::MAX);
        self.last_refill += Duration::from_millis(advance_ms);
    }

    fn try_consume(&mut self, policy: &RateLimitPolicy, now: Instant) -> RateLimitResult {
        self.refill(policy, now);

        if self.tokens >= policy.requested() {
            self.tokens -= policy.requested();
            return RateLimitResult::allowed(self.tokens);
        }

        let deficit = policy.requested() - self.tokens;
        let periods_needed =
            u32::try_from(deficit.div_ceil(policy.refill_tokens())).unwrap_or(u32::MAX);
        let since_refill = now.saturating_duration_since(self.last_refill);
        let wait = (policy.refill_period() * periods_needed).saturating_sub(since_refill);
        RateLimitResult::denied(self.tokens, Some(wait))
    }
}

/// In-memory token-bucket rate limiter.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use safeguard_core::{Key, MemoryRateLimiter, RateLimitPolicy, RateLimiter};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let limiter = MemoryRateLimiter::new();
/// let key = Key::new("api.call", "tenant-1");
/// let policy = RateLimitPolicy::new(2, 1, Duration::from_secs(60));
///
/// assert!(limiter.try_consume(&key, &policy).await.unwrap().allowed);
/// assert!(limiter.try_consume(&key, &policy).await.unwrap().allowed);
/// assert!(!limiter.try_consume(&key, &policy).await.unwrap().allowed);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl MemoryRateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn try_consume(
        &self,
        key: &Key,
        policy: &RateLimitPolicy,
    ) -> SafeguardResult<RateLimitResult> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket =
            buckets.entry(key.full()).or_insert_with(|| BucketState::new(policy, now));
        Ok(bucket.try_consume(policy, now))
    }

    async fn refund(
        &self,
        key: &Key,
        amount: u64,
        policy: &RateLimitPolicy,
    ) -> SafeguardResult<u64> {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(&key.full()) else {
            return Ok(0);
        };
        let credited = amount.min(policy.capacity().saturating_sub(bucket.tokens));
        bucket.tokens += credited;
        Ok(credited)
    }
}

/// In-memory cooldown gate.
#[derive(Debug, Default)]
pub struct MemoryCooldownGuard {
    flags: Mutex<HashMap<String, Instant>>,
}

impl MemoryCooldownGuard {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownGuard for MemoryCooldownGuard {
    async fn acquire(&self, key: &Key, policy: &CooldownPolicy) -> SafeguardResult<CooldownTicket> {
        let now = Instant::now();
        let mut flags = self.flags.lock();
        match flags.get(&key.full()) {
            Some(expires_at) if *expires_at > now => {
                Ok(CooldownTicket { acquired: false, remaining: *expires_at - now })
            }
            _ => {
                flags.insert(key.full(), now + policy.ttl());
                Ok(CooldownTicket { acquired: true, remaining: policy.ttl() })
            }
        }
    }

    async fn release(&self, key: &Key) -> SafeguardResult<()> {
        self.flags.lock().remove(&key.full());
        Ok(())
    }
}

#[derive(Debug)]
struct StoredRecord {
    record: IdempotencyRecord,
    expires_at: Instant,
}

/// In-memory idempotency manager.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyManager {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryIdempotencyManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyManager for MemoryIdempotencyManager {
    async fn get(&self, key: &Key) -> SafeguardResult<Option<IdempotencyRecord>> {
        let now = Instant::now();
        let mut records = self.records.lock();
        match records.get(&key.full()) {
            Some(stored) if stored.expires_at > now => Ok(Some(stored.record.clone())),
            Some(_) => {
                // stale-PENDING recovery: an expired record is absent
                records.remove(&key.full());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn try_acquire_pending(
        &self,
        key: &Key,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<bool> {
        let now = Instant::now();
        let mut records = self.records.lock();
        if let Some(stored) = records.get(&key.full())
            && stored.expires_at > now
        {
            return Ok(false);
        }
        records.insert(
            key.full(),
            StoredRecord { record: IdempotencyRecord::pending(), expires_at: now + policy.ttl() },
        );
        Ok(true)
    }

    async fn save_success(
        &self,
        key: &Key,
        record: IdempotencyRecord,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()> {
        let stored = StoredRecord {
            record: IdempotencyRecord { status: IdempotencyStatus::Success, ..record },
            expires_at: Instant::now() + policy.ttl(),
        };
        self.records.lock().insert(key.full(), stored);
        Ok(())
    }

    async fn clear(&self, key: &Key) -> SafeguardResult<()> {
        self.records.lock().remove(&key.full());
        Ok(())
    }

    async fn update_status(
        &self,
        key: &Key,
        status: IdempotencyStatus,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()> {
        let now = Instant::now();
        let mut records = self.records.lock();
        let entry = records.entry(key.full()).or_insert_with(|| StoredRecord {
            record: IdempotencyRecord { status, payload_type: None, payload: None },
            expires_at: now,
        });
        entry.record.status = status;
        entry.expires_at = now + policy.ttl();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AttemptState {
    failures: u64,
    window_expires: Option<Instant>,
    lock_expires: Option<Instant>,
    strikes: u64,
    strikes_expire: Option<Instant>,
}

impl AttemptState {
    fn prune(&mut self, now: Instant) {
        if self.window_expires.is_some_and(|t| t <= now) {
            self.failures = 0;
            self.window_expires = None;
        }
        if self.lock_expires.is_some_and(|t| t <= now) {
            self.lock_expires = None;
        }
        if self.strikes_expire.is_some_and(|t| t <= now) {
            self.strikes = 0;
            self.strikes_expire = None;
        }
    }

    fn lock_remaining(&self, now: Instant) -> Option<Duration> {
        self.lock_expires.map(|t| t.saturating_duration_since(now)).filter(|d| !d.is_zero())
    }

    fn window_remaining(&self, now: Instant) -> Duration {
        self.window_expires.map(|t| t.saturating_duration_since(now)).unwrap_or(Duration::ZERO)
    }

    /// Records a strike and locks the key for the escalated duration.
    fn lock_out(&mut self, policy: &AttemptPolicy, now: Instant) -> Duration {
        self.strikes += 1;
        let lock_for = policy.lock_for_strikes(self.strikes);
        self.lock_expires = Some(now + lock_for);
        // strike memory decays after a few quiet lock cycles
        self.strikes_expire = Some(now + (lock_for + policy.window()) * 4);
        self.failures = 0;
        self.window_expires = None;
        lock_for
    }
}

/// In-memory attempt-limit manager.
#[derive(Debug, Default)]
pub struct MemoryAttemptLimitManager {
    states: Mutex<HashMap<String, AttemptState>>,
}

impl MemoryAttemptLimitManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptLimitManager for MemoryAttemptLimitManager {
    async fn on_check(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        let now = Instant::now();
        let mut states = self.states.lock();
        let state = states.entry(key.full()).or_default();
        state.prune(now);

        if let Some(remaining) = state.lock_remaining(now) {
            return Ok(AttemptCheck::locked(remaining));
        }
        if state.failures >= policy.max() {
            // exhausted window found during pre-check: strike and lock now
            let lock_for = state.lock_out(policy, now);
            return Ok(AttemptCheck::locked(lock_for));
        }
        Ok(AttemptCheck::allowed(state.window_remaining(now)))
    }

    async fn on_fail(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        let now = Instant::now();
        let mut states = self.states.lock();
        let state = states.entry(key.full()).or_default();
        state.prune(now);

        if let Some(remaining) = state.lock_remaining(now) {
            return Ok(AttemptCheck::locked(remaining));
        }

        state.failures += 1;
        if state.window_expires.is_none() {
            state.window_expires = Some(now + policy.window());
        }

        if state.failures >= policy.max() {
            let lock_for = state.lock_out(policy, now);
            return Ok(AttemptCheck::locked(lock_for));
        }
        Ok(AttemptCheck::allowed(state.window_remaining(now)))
    }

    async fn on_success(&self, key: &Key, _policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        let now = Instant::now();
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&key.full()) {
            state.prune(now);
            state.failures = 0;
            state.window_expires = None;
            state.lock_expires = None;
        }
        Ok(AttemptCheck::allowed(Duration::ZERO))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::new("test.op", "k1")
    }

    #[test]
    fn bucket_allows_within_capacity() {
        let policy = RateLimitPolicy::new(3, 1, Duration::from_secs(60));
        let now = Instant::now();
        let mut bucket = BucketState::new(&policy, now);

        for _ in 0..3 {
            assert!(bucket.try_consume(&policy, now).allowed);
        }
        let denied = bucket.try_consume(&policy, now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.unwrap() > Duration::ZERO);
    }

    #[test]
    fn bucket_refills_by_whole_periods_only() {
        let policy = RateLimitPolicy::new(10, 2, Duration::from_secs(1));
        let now = Instant::now();
        let mut bucket = BucketState::new(&policy, now);
        bucket.tokens = 0;

        // Half a period: nothing refilled, last_refill untouched.
        let before = bucket.last_refill;
        bucket.refill(&policy, now + Duration::from_millis(500));
        assert_eq!(bucket.tokens, 0);
        assert_eq!(bucket.last_refill, before);

        // 2.5 periods: two whole refills, last_refill advances by exactly 2s.
        bucket.refill(&policy, now + Duration::from_millis(2500));
        assert_eq!(bucket.tokens, 4);
        assert_eq!(bucket.last_refill, before + Duration::from_secs(2));
    }

    #[test]
    fn bucket_refill_caps_at_capacity() {
        let policy = RateLimitPolicy::new(5, 3, Duration::from_secs(1));
        let now = Instant::now();
        let mut bucket = BucketState::new(&policy, now);
        bucket.tokens = 4;

        bucket.refill(&policy, now + Duration::from_secs(100));
        assert_eq!(bucket.tokens, 5);
    }

    #[test]
    fn denied_result_reports_deficit_wait() {
        let policy = RateLimitPolicy::new(4, 1, Duration::from_secs(1)).with_requested(4);
        let now = Instant::now();
        let mut bucket = BucketState::new(&policy, now);
        assert!(bucket.try_consume(&policy, now).allowed);

        // Empty bucket, requesting 4 with 1 token/second: 4 whole periods.
        let denied = bucket.try_consume(&policy, now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after.unwrap(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn refund_caps_at_capacity() {
        let limiter = MemoryRateLimiter::new();
        let policy = RateLimitPolicy::new(5, 1, Duration::from_secs(60));

        // Nothing to refund before the bucket exists.
        assert_eq!(limiter.refund(&key(), 3, &policy).await.unwrap(), 0);

        for _ in 0..4 {
            let _ = limiter.try_consume(&key(), &policy).await.unwrap();
        }
        // 1 token left; refunding 10 credits only the 4 missing.
        assert_eq!(limiter.refund(&key(), 10, &policy).await.unwrap(), 4);
        let denied_then = limiter.try_consume(&key(), &policy).await.unwrap();
        assert_eq!(denied_then.remaining, 4);
    }

    #[tokio::test]
    async fn cooldown_acquire_is_exclusive_until_release() {
        let guard = MemoryCooldownGuard::new();
        let policy = CooldownPolicy::new(Duration::from_secs(60));

        let first = guard.acquire(&key(), &policy).await.unwrap();
        assert!(first.acquired);
        assert_eq!(first.remaining, Duration::from_secs(60));

        let second = guard.acquire(&key(), &policy).await.unwrap();
        assert!(!second.acquired);
        assert!(second.remaining > Duration::ZERO);

        guard.release(&key()).await.unwrap();
        assert!(guard.acquire(&key(), &policy).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn cooldown_flag_expires() {
        let guard = MemoryCooldownGuard::new();
        let policy = CooldownPolicy::new(Duration::from_millis(30));

        assert!(guard.acquire(&key(), &policy).await.unwrap().acquired);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(guard.acquire(&key(), &policy).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn idempotency_acquire_then_clear_allows_retry() {
        let manager = MemoryIdempotencyManager::new();
        let policy = IdempotencyPolicy::new(Duration::from_secs(60));

        assert!(manager.try_acquire_pending(&key(), &policy).await.unwrap());
        assert!(!manager.try_acquire_pending(&key(), &policy).await.unwrap());

        manager.clear(&key()).await.unwrap();
        assert!(manager.try_acquire_pending(&key(), &policy).await.unwrap());
    }

    #[tokio::test]
    async fn idempotency_pending_expires() {
        let manager = MemoryIdempotencyManager::new();
        let policy = IdempotencyPolicy::new(Duration::from_millis(30));

        assert!(manager.try_acquire_pending(&key(), &policy).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(manager.get(&key()).await.unwrap(), None);
        assert!(manager.try_acquire_pending(&key(), &policy).await.unwrap());
    }

    #[tokio::test]
    async fn idempotency_update_status_refreshes_ttl() {
        let manager = MemoryIdempotencyManager::new();
        let policy = IdempotencyPolicy::new(Duration::from_millis(80));

        assert!(manager.try_acquire_pending(&key(), &policy).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.update_status(&key(), IdempotencyStatus::Pending, &policy).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Without the refresh the record would have expired by now.
        let record = manager.get(&key()).await.unwrap().expect("record kept alive");
        assert_eq!(record.status, IdempotencyStatus::Pending);
    }

    #[tokio::test]
    async fn save_success_forces_success_status() {
        let manager = MemoryIdempotencyManager::new();
        let policy = IdempotencyPolicy::new(Duration::from_secs(60));

        let record = IdempotencyRecord {
            status: IdempotencyStatus::Pending,
            payload_type: None,
            payload: Some(bytes::Bytes::from_static(b"{}")),
        };
        manager.save_success(&key(), record, &policy).await.unwrap();

        let stored = manager.get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.status, IdempotencyStatus::Success);
    }

    #[tokio::test]
    async fn attempt_limit_locks_after_budget() {
        let manager = MemoryAttemptLimitManager::new();
        let policy = AttemptPolicy::new(Duration::from_secs(60), 2, Duration::from_secs(30));

        assert!(manager.on_check(&key(), &policy).await.unwrap().allowed);
        assert!(manager.on_fail(&key(), &policy).await.unwrap().allowed);

        let locked = manager.on_fail(&key(), &policy).await.unwrap();
        assert!(!locked.allowed);
        assert_eq!(locked.lock_ttl, Duration::from_secs(30));

        let blocked = manager.on_check(&key(), &policy).await.unwrap();
        assert!(!blocked.allowed);
        assert!(blocked.lock_ttl > Duration::ZERO);
    }

    #[tokio::test]
    async fn attempt_success_clears_window_and_lock() {
        let manager = MemoryAttemptLimitManager::new();
        let policy = AttemptPolicy::new(Duration::from_secs(60), 2, Duration::from_secs(30));

        let _ = manager.on_fail(&key(), &policy).await.unwrap();
        let _ = manager.on_fail(&key(), &policy).await.unwrap();
        assert!(!manager.on_check(&key(), &policy).await.unwrap().allowed);

        manager.on_success(&key(), &policy).await.unwrap();
        assert!(manager.on_check(&key(), &policy).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn repeat_strikes_escalate_lock_duration() {
        let manager = MemoryAttemptLimitManager::new();
        let mut escalate = std::collections::BTreeMap::new();
        escalate.insert(2, Duration::from_secs(600));
        let policy = AttemptPolicy::new(Duration::from_secs(60), 1, Duration::from_secs(30))
            .with_escalate(escalate);

        // First strike: base lock.
        let first = manager.on_fail(&key(), &policy).await.unwrap();
        assert_eq!(first.lock_ttl, Duration::from_secs(30));

        // Clear the lock, fail again: second strike escalates.
        manager.on_success(&key(), &policy).await.unwrap();
        let second = manager.on_fail(&key(), &policy).await.unwrap();
        assert_eq!(second.lock_ttl, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn attempt_window_expires() {
        let manager = MemoryAttemptLimitManager::new();
        let policy = AttemptPolicy::new(Duration::from_millis(40), 2, Duration::from_secs(30));

        let _ = manager.on_fail(&key(), &policy).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The window lapsed, so this failure starts a fresh count.
        let check = manager.on_fail(&key(), &policy).await.unwrap();
        assert!(check.allowed);
    }
}
