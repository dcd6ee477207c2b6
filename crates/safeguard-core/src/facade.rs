//! The orchestration facade: compose a guard with the protected work.
//!
//! [`Safeguard`] is an explicitly constructed, dependency-injected bundle
//! of guards, payload codec, and metrics sink. Each entry point follows
//! the same protocol: check the guard, execute the caller's work, then
//! commit or roll back guard state and fire the matching metric. Guard
//! rejections surface as typed [`SafeguardError`] values converted into
//! the caller's error type; the work's own errors propagate unchanged
//! after the guard's cleanup step runs.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use safeguard_core::{Key, RateLimitPolicy, Safeguard, SafeguardError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let safeguard = Safeguard::in_memory();
//! let key = Key::new("email.send", "user@example.com");
//! let policy = RateLimitPolicy::new(10, 1, Duration::from_secs(1));
//!
//! let sent: Result<&str, SafeguardError> = safeguard
//!     .with_rate_limit(&key, &policy, || async { Ok("sent") })
//!     .await;
//! assert_eq!(sent.unwrap(), "sent");
//! # });
//! ```

use std::{future::Future, sync::Arc, time::Instant};

use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::{
    codec::{NoopPayloadCodec, PayloadCodec},
    error::{SafeguardError, SafeguardResult},
    guard::{AttemptLimitManager, CooldownGuard, IdempotencyManager, RateLimiter},
    key::Key,
    memory::{
        MemoryAttemptLimitManager, MemoryCooldownGuard, MemoryIdempotencyManager,
        MemoryRateLimiter,
    },
    metrics::{NoopSafeguardMetrics, SafeguardMetrics},
    model::{IdempotencyRecord, IdempotencyStatus},
    policy::{AttemptPolicy, CooldownPolicy, IdemMode, IdempotencyPolicy, RateLimitPolicy},
};

/// Composes guards with caller-supplied work and rollback logic.
///
/// Construct one per shared-store client and share it freely; all state
/// lives in the guards. The attempt-limit manager is optional — calling
/// [`with_attempt_limit`](Safeguard::with_attempt_limit) without one
/// configured is a `Store` configuration error.
pub struct Safeguard {
    rate_limiter: Arc<dyn RateLimiter>,
    cooldown: Arc<dyn CooldownGuard>,
    idempotency: Arc<dyn IdempotencyManager>,
    attempts: Option<Arc<dyn AttemptLimitManager>>,
    codec: Arc<dyn PayloadCodec>,
    metrics: Arc<dyn SafeguardMetrics>,
}

impl Safeguard {
    /// Creates a facade over the given guards with a no-op codec and
    /// metrics sink.
    #[must_use]
    pub fn new(
        rate_limiter: Arc<dyn RateLimiter>,
        cooldown: Arc<dyn CooldownGuard>,
        idempotency: Arc<dyn IdempotencyManager>,
    ) -> Self {
        Self {
            rate_limiter,
            cooldown,
            idempotency,
            attempts: None,
            codec: Arc::new(NoopPayloadCodec),
            metrics: Arc::new(NoopSafeguardMetrics),
        }
    }

    /// Creates a facade wired to in-memory guards and the JSON codec.
    ///
    /// Suitable for tests and single-process deployments; see
    /// [`memory`](crate::memory) for the limitations.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryRateLimiter::new()),
            Arc::new(MemoryCooldownGuard::new()),
            Arc::new(MemoryIdempotencyManager::new()),
        )
        .with_attempt_limits(Arc::new(MemoryAttemptLimitManager::new()))
        .with_codec(Arc::new(crate::codec::JsonPayloadCodec))
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn SafeguardMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the payload codec used for idempotent result replay.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the attempt-limit manager.
    #[must_use]
    pub fn with_attempt_limits(mut self, attempts: Arc<dyn AttemptLimitManager>) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Returns the rate limiter, for callers integrating below the facade.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    /// Returns the cooldown guard.
    #[must_use]
    pub fn cooldown(&self) -> &Arc<dyn CooldownGuard> {
        &self.cooldown
    }

    /// Returns the idempotency manager.
    #[must_use]
    pub fn idempotency(&self) -> &Arc<dyn IdempotencyManager> {
        &self.idempotency
    }

    /// Runs `work` if the key's token bucket admits the request.
    ///
    /// A denied check fires the blocked metric and raises
    /// [`SafeguardError::RateLimitExceeded`]; there is no compensating
    /// action — a rejected call is simply rejected. When the policy
    /// carries a non-zero `timeout`, the check polls for up to that long
    /// before giving up.
    pub async fn with_rate_limit<T, E, F, Fut>(
        &self,
        key: &Key,
        policy: &RateLimitPolicy,
        work: F,
    ) -> Result<T, E>
    where
        E: From<SafeguardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result =
            self.rate_limiter.try_consume_with_timeout(key, policy).await.map_err(E::from)?;
        if !result.allowed {
            self.metrics.on_rate_limit_blocked(key.namespace(), key.value());
            return Err(SafeguardError::rate_limit_exceeded(key.clone(), result.retry_after).into());
        }
        work().await
    }

    /// Runs `work` if the key's cooldown flag could be acquired; the flag
    /// then stays set for the policy TTL regardless of the work's outcome.
    ///
    /// Cooldown is by design, not by success: a failing work does not
    /// release the flag. Use
    /// [`with_cooldown_rollback`](Safeguard::with_cooldown_rollback) to
    /// release it for failures that should not count.
    pub async fn with_cooldown<T, E, F, Fut>(
        &self,
        key: &Key,
        policy: &CooldownPolicy,
        work: F,
    ) -> Result<T, E>
    where
        E: From<SafeguardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.with_cooldown_rollback(key, policy, |_| false, work).await
    }

    /// Like [`with_cooldown`](Safeguard::with_cooldown), but when the work
    /// fails and `rollback_on(&err)` returns true, the flag is released
    /// before the error propagates — a retried call is not unfairly cooled
    /// down for a failure that was not the caller's fault (e.g. a
    /// downstream channel outage).
    pub async fn with_cooldown_rollback<T, E, R, F, Fut>(
        &self,
        key: &Key,
        policy: &CooldownPolicy,
        rollback_on: R,
        work: F,
    ) -> Result<T, E>
    where
        E: From<SafeguardError>,
        R: Fn(&E) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.cooldown.acquire(key, policy).await.map_err(E::from)?;
        if !ticket.acquired {
            self.metrics.on_cooldown_blocked(key.namespace(), key.value());
            return Err(SafeguardError::cooldown_active(key.clone(), ticket.remaining).into());
        }

        match work().await {
            Ok(out) => Ok(out),
            Err(err) => {
                if rollback_on(&err) {
                    match self.cooldown.release(key).await {
                        Ok(()) => {
                            self.metrics.on_cooldown_rolled_back(key.namespace(), key.value());
                        }
                        Err(release_err) => {
                            warn!(key = %key, error = %release_err, "cooldown rollback failed");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Runs `work` at most once per key: exactly-once effect under
    /// at-least-once calls.
    ///
    /// A completed record replays its cached payload without re-running
    /// the work; if the payload cannot be decoded into `T`, the raw record
    /// surfaces as [`SafeguardError::IdempotencyReplay`]. An in-flight
    /// duplicate either fails fast ([`IdemMode::Conflict409`]) or waits,
    /// bounded by the policy's `wait_timeout`, for the record to resolve.
    /// On a fresh key the PENDING marker is acquired atomically; losing
    /// that race raises [`SafeguardError::IdempotencyConflict`]. A failed
    /// work clears the record so the operation stays retryable, then the
    /// failure propagates unchanged.
    pub async fn with_idempotency<T, E, F, Fut>(
        &self,
        key: &Key,
        policy: &IdempotencyPolicy,
        work: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<SafeguardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let wait_deadline = Instant::now() + policy.wait_timeout();
        loop {
            match self.idempotency.get(key).await.map_err(E::from)? {
                None => break,
                Some(record) => match record.status {
                    IdempotencyStatus::Success => {
                        return self.replay::<T>(key, record).map_err(E::from);
                    }
                    IdempotencyStatus::Pending => match policy.mode() {
                        IdemMode::Conflict409 => return Err(self.conflict(key).into()),
                        IdemMode::ReturnSaved | IdemMode::WaitUntilDone => {
                            let left = wait_deadline.saturating_duration_since(Instant::now());
                            if left.is_zero() {
                                return Err(self.conflict(key).into());
                            }
                            tokio::time::sleep(policy.poll_interval().min(left)).await;
                        }
                    },
                },
            }
        }

        if !self.idempotency.try_acquire_pending(key, policy).await.map_err(E::from)? {
            return Err(self.conflict(key).into());
        }
        self.metrics.on_idem_miss(key.namespace(), key.value());

        match work().await {
            Ok(out) => {
                let record = self.encode(&out).map_err(E::from)?;
                self.idempotency.save_success(key, record, policy).await.map_err(E::from)?;
                Ok(out)
            }
            Err(err) => {
                // clear so a retry is a fresh attempt; best-effort
                if let Err(clear_err) = self.idempotency.clear(key).await {
                    warn!(key = %key, error = %clear_err, "failed to clear idempotency record");
                }
                Err(err)
            }
        }
    }

    /// Runs `work` unless the key's failure budget is exhausted.
    ///
    /// A locked key raises [`SafeguardError::AttemptLimitExceeded`] with
    /// the time left on the lock. The work's failure consumes one attempt
    /// (locking the key when the budget is spent) and propagates
    /// unchanged; its success clears the window when the policy says so.
    pub async fn with_attempt_limit<T, E, F, Fut>(
        &self,
        key: &Key,
        policy: &AttemptPolicy,
        work: F,
    ) -> Result<T, E>
    where
        E: From<SafeguardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(attempts) = self.attempts.as_ref() else {
            return Err(SafeguardError::store("no attempt limit manager configured").into());
        };

        let pre = attempts.on_check(key, policy).await.map_err(E::from)?;
        if !pre.allowed {
            self.metrics.on_attempt_blocked(key.namespace(), key.value(), pre.lock_ttl);
            return Err(
                SafeguardError::attempt_limit_exceeded(key.clone(), pre.retry_after()).into()
            );
        }

        match work().await {
            Ok(out) => {
                if policy.success_reset() {
                    attempts.on_success(key, policy).await.map_err(E::from)?;
                    self.metrics.on_attempt_reset(key.namespace(), key.value());
                }
                Ok(out)
            }
            Err(err) => {
                match attempts.on_fail(key, policy).await {
                    Ok(check) if !check.allowed => {
                        self.metrics.on_attempt_locked(key.namespace(), key.value(), check.lock_ttl);
                    }
                    Ok(_) => {}
                    Err(fail_err) => {
                        warn!(key = %key, error = %fail_err, "failed to record attempt failure");
                    }
                }
                Err(err)
            }
        }
    }

    /// Builds the SUCCESS record for a completed work result.
    fn encode<T: Serialize>(&self, out: &T) -> SafeguardResult<IdempotencyRecord> {
        let value = serde_json::to_value(out)
            .map_err(|e| SafeguardError::codec_with_source("failed to encode work result", e))?;
        let payload = self.codec.serialize(&value)?;
        let payload_type = payload.is_some().then(|| std::any::type_name::<T>().to_string());
        Ok(IdempotencyRecord::success(payload_type, payload))
    }

    /// Decodes a SUCCESS record back into the caller's type; on failure the
    /// record itself is surfaced so the work is never re-run.
    fn replay<T: DeserializeOwned>(
        &self,
        key: &Key,
        record: IdempotencyRecord,
    ) -> SafeguardResult<T> {
        self.metrics.on_idem_hit(key.namespace(), key.value());
        if let Some(bytes) = record.payload.as_ref()
            && let Ok(value) = self.codec.deserialize(bytes, record.payload_type.as_deref())
            && let Ok(decoded) = serde_json::from_value::<T>(value)
        {
            return Ok(decoded);
        }
        Err(SafeguardError::idempotency_replay(key.clone(), record))
    }

    fn conflict(&self, key: &Key) -> SafeguardError {
        self.metrics.on_idem_conflict(key.namespace(), key.value());
        SafeguardError::idempotency_conflict(key.clone())
    }
}
