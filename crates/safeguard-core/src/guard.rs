//! Guard trait definitions.
//!
//! The four guards share a shape: each operates on a single logical
//! [`Key`], takes its parameters from an immutable policy, and performs
//! its read-modify-write against the shared store through one atomic
//! operation. Implementations must be safe to invoke from multiple
//! concurrent callers — including callers in different processes — because
//! the shared store, not in-process locking, is the sole source of mutual
//! exclusion. Within a single key, the net effect of N concurrent calls is
//! equivalent to some sequential ordering of those calls; across keys no
//! ordering is guaranteed or needed.
//!
//! A caller that abandons a guard check (e.g. due to an upstream timeout)
//! cannot un-ask the store: the operation either completed with a side
//! effect or it did not. Treat a timed-out check as indeterminate.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{
    error::SafeguardResult,
    key::Key,
    model::{AttemptCheck, CooldownTicket, IdempotencyRecord, IdempotencyStatus, RateLimitResult},
    policy::{AttemptPolicy, CooldownPolicy, IdempotencyPolicy, RateLimitPolicy},
};

/// Token-bucket admission control.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Attempts to consume `policy.requested()` tokens from the key's bucket.
    ///
    /// Refill and consumption happen in one atomic step against the store:
    /// two concurrent requests can never both observe a full bucket and
    /// double-spend. A denied attempt still applies the refill.
    #[must_use = "the admission decision must be inspected"]
    async fn try_consume(&self, key: &Key, policy: &RateLimitPolicy)
    -> SafeguardResult<RateLimitResult>;

    /// Returns up to `amount` unused tokens to the bucket, reporting how
    /// many were actually credited (the bucket never exceeds capacity and
    /// an absent bucket credits nothing).
    ///
    /// This is a manual compensation hook for callers that consumed tokens
    /// for work that never ran; the facade never calls it.
    async fn refund(&self, key: &Key, amount: u64, policy: &RateLimitPolicy)
    -> SafeguardResult<u64>;

    /// Polls [`try_consume`](RateLimiter::try_consume) for up to
    /// `policy.timeout()`, sleeping between attempts.
    ///
    /// The sleep is bounded by the store's `retry_after` hint and the time
    /// left in the budget. With a zero timeout this is a single attempt; a
    /// request larger than the capacity fails immediately since no amount
    /// of waiting can satisfy it. The underlying primitive never blocks —
    /// all waiting happens here, caller-side.
    async fn try_consume_with_timeout(
        &self,
        key: &Key,
        policy: &RateLimitPolicy,
    ) -> SafeguardResult<RateLimitResult> {
        if policy.timeout().is_zero() {
            return self.try_consume(key, policy).await;
        }
        if policy.requested() > policy.capacity() {
            return Ok(RateLimitResult::denied(0, None));
        }

        let deadline = Instant::now() + policy.timeout();
        loop {
            let result = self.try_consume(key, policy).await?;
            if result.allowed {
                return Ok(result);
            }

            let left = deadline.saturating_duration_since(Instant::now());
            let hint = result.retry_after.unwrap_or(Duration::ZERO);
            if hint.is_zero() || left.is_zero() {
                return Ok(result);
            }
            tokio::time::sleep(hint.min(left).max(Duration::from_millis(1))).await;
        }
    }
}

/// Single-flag acquire/release gate with TTL-based auto-expiry.
#[async_trait]
pub trait CooldownGuard: Send + Sync {
    /// Atomically sets the cooldown flag iff absent, with expiry
    /// `policy.ttl()`.
    ///
    /// On success the ticket reports `acquired = true` and the full TTL;
    /// when a flag already exists, `acquired = false` and the time left on
    /// the existing flag.
    #[must_use = "the acquisition decision must be inspected"]
    async fn acquire(&self, key: &Key, policy: &CooldownPolicy) -> SafeguardResult<CooldownTicket>;

    /// Unconditionally deletes the flag so the next caller can acquire
    /// immediately.
    ///
    /// This is the rollback path for attempts the caller judges a
    /// non-event, e.g. a downstream outage that should not count against
    /// the cooldown.
    async fn release(&self, key: &Key) -> SafeguardResult<()>;
}

/// Per-key idempotency state machine: `∅ → PENDING → SUCCESS`, with
/// `∅ → ∅` (clear) as the failure path.
#[async_trait]
pub trait IdempotencyManager: Send + Sync {
    /// Non-mutating read of the key's record.
    async fn get(&self, key: &Key) -> SafeguardResult<Option<IdempotencyRecord>>;

    /// Atomically creates a PENDING record with TTL iff none exists.
    ///
    /// Returns `false` when any record (PENDING or SUCCESS) already
    /// exists — the caller lost the acquisition race.
    #[must_use = "a false result means a concurrent caller won the race"]
    async fn try_acquire_pending(
        &self,
        key: &Key,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<bool>;

    /// Atomically overwrites the record with status SUCCESS, the cached
    /// payload, and a refreshed TTL.
    async fn save_success(
        &self,
        key: &Key,
        record: IdempotencyRecord,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()>;

    /// Deletes the record so a subsequent call is a fresh attempt. Used
    /// after a failed attempt.
    async fn clear(&self, key: &Key) -> SafeguardResult<()>;

    /// Low-level status mutation with TTL refresh.
    ///
    /// Long-running operations use this to keep their PENDING marker alive
    /// past the original TTL.
    async fn update_status(
        &self,
        key: &Key,
        status: IdempotencyStatus,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()>;
}

/// Failure-window lockout: at most `policy.max()` failures within the
/// rolling window, then the key locks.
#[async_trait]
pub trait AttemptLimitManager: Send + Sync {
    /// Pre-flight check; does not consume from the window. When the window
    /// is already exhausted the key locks immediately.
    #[must_use = "the lockout decision must be inspected"]
    async fn on_check(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck>;

    /// Records one failure. Reaching the budget locks the key for the
    /// escalated lock duration and clears the window.
    async fn on_fail(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck>;

    /// Records a success: clears the failure window and any active lock.
    /// Strike history persists so repeat offenders still escalate.
    async fn on_success(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck>;
}
