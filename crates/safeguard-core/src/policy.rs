//! Numeric policies governing guard behavior.
//!
//! Each guard takes its parameters from an immutable policy value:
//! [`RateLimitPolicy`] (token bucket), [`CooldownPolicy`] (flag TTL),
//! [`IdempotencyPolicy`] (record TTL and duplicate-handling mode), and
//! [`AttemptPolicy`] (failure window with lockout).
//!
//! Policies are plain data and serde-compatible so they can be loaded from
//! configuration files; durations use humantime notation (`"30s"`, `"5m"`).
//! Constructors validate numeric invariants and panic on violation — a
//! zero-capacity limiter or a zero-TTL cooldown is a programming error,
//! not a runtime condition.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_requested() -> u64 {
    1
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_true() -> bool {
    true
}

/// Configuration for the token-bucket rate limiter.
///
/// The bucket holds at most `capacity` tokens and gains `refill_tokens`
/// tokens every `refill_period`. Each admission consumes `requested`
/// tokens (default 1). When `timeout` is non-zero, callers going through
/// [`try_consume_with_timeout`](crate::guard::RateLimiter::try_consume_with_timeout)
/// poll-and-sleep for up to that long before giving up; the primitive
/// itself never blocks.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use safeguard_core::RateLimitPolicy;
///
/// // 100-token burst, 10 tokens replenished per second
/// let policy = RateLimitPolicy::new(100, 10, Duration::from_secs(1));
/// assert_eq!(policy.capacity(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    capacity: u64,
    refill_tokens: u64,
    #[serde(with = "humantime_serde")]
    refill_period: Duration,
    #[serde(with = "humantime_serde", default)]
    timeout: Duration,
    #[serde(default = "default_requested")]
    requested: u64,
}

impl RateLimitPolicy {
    /// Creates a rate-limit policy.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `refill_tokens` is zero, or if
    /// `refill_period` is zero.
    #[must_use]
    pub fn new(capacity: u64, refill_tokens: u64, refill_period: Duration) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        assert!(refill_tokens >= 1, "refill_tokens must be at least 1");
        assert!(!refill_period.is_zero(), "refill_period must be non-zero");
        Self { capacity, refill_tokens, refill_period, timeout: Duration::ZERO, requested: 1 }
    }

    /// Sets the number of tokens each admission consumes.
    ///
    /// # Panics
    ///
    /// Panics if `requested` is zero or exceeds the capacity.
    #[must_use]
    pub fn with_requested(mut self, requested: u64) -> Self {
        assert!(requested >= 1, "requested must be at least 1");
        assert!(requested <= self.capacity, "requested must not exceed capacity");
        self.requested = requested;
        self
    }

    /// Sets the advisory poll-and-sleep budget for blocking callers.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the maximum number of tokens the bucket holds.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of tokens added per refill period.
    #[must_use]
    pub fn refill_tokens(&self) -> u64 {
        self.refill_tokens
    }

    /// Returns the refill period.
    #[must_use]
    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// Returns the advisory poll-and-sleep budget (zero = fail fast).
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the number of tokens consumed per admission.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested
    }
}

/// Configuration for the cooldown gate: how long an acquired flag blocks
/// subsequent acquisitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    #[serde(with = "humantime_serde")]
    ttl: Duration,
}

impl CooldownPolicy {
    /// Creates a cooldown policy.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        assert!(!ttl.is_zero(), "ttl must be non-zero");
        Self { ttl }
    }

    /// Returns the cooldown flag's time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// How a duplicate call is handled while another is in flight or after one
/// has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdemMode {
    /// Return the saved result; if a duplicate is still in flight, wait
    /// (bounded by the policy's `wait_timeout`) for it to resolve.
    #[default]
    ReturnSaved,
    /// Fail fast: an in-flight duplicate is a conflict the caller should
    /// translate to HTTP 409 or equivalent.
    Conflict409,
    /// Poll until the in-flight duplicate resolves, bounded by the
    /// policy's `wait_timeout`.
    WaitUntilDone,
}

/// Configuration for the idempotency guard.
///
/// `ttl` bounds both the PENDING marker (stale-PENDING recovery when a
/// process dies mid-flight) and the cached SUCCESS record. `wait_timeout`
/// and `poll_interval` bound the pending-resolution wait used by the
/// [`ReturnSaved`](IdemMode::ReturnSaved) and
/// [`WaitUntilDone`](IdemMode::WaitUntilDone) modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyPolicy {
    #[serde(with = "humantime_serde")]
    ttl: Duration,
    #[serde(default)]
    mode: IdemMode,
    #[serde(with = "humantime_serde", default = "default_wait_timeout")]
    wait_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    poll_interval: Duration,
}

impl IdempotencyPolicy {
    /// Creates an idempotency policy with the default
    /// [`ReturnSaved`](IdemMode::ReturnSaved) mode.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        assert!(!ttl.is_zero(), "ttl must be non-zero");
        Self {
            ttl,
            mode: IdemMode::default(),
            wait_timeout: default_wait_timeout(),
            poll_interval: default_poll_interval(),
        }
    }

    /// Sets the duplicate-handling mode.
    #[must_use]
    pub fn with_mode(mut self, mode: IdemMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounds how long a caller waits for an in-flight duplicate to resolve.
    #[must_use]
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Sets the interval between polls while waiting on a PENDING record.
    ///
    /// # Panics
    ///
    /// Panics if `poll_interval` is zero.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        assert!(!poll_interval.is_zero(), "poll_interval must be non-zero");
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the record time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the duplicate-handling mode.
    #[must_use]
    pub fn mode(&self) -> IdemMode {
        self.mode
    }

    /// Returns the bound on waiting for an in-flight duplicate.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Returns the poll interval used while waiting.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Configuration for the attempt-limit guard: at most `max` failures within
/// a rolling `window`, then the key locks for `lock`.
///
/// `escalate` maps cumulative strike counts to longer lock durations, so
/// repeat offenders lock for progressively longer; the entry with the
/// greatest threshold not exceeding the strike count wins. When
/// `success_reset` is set (the default), a successful attempt clears the
/// failure window and any active lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptPolicy {
    #[serde(with = "humantime_serde")]
    window: Duration,
    max: u64,
    #[serde(with = "humantime_serde")]
    lock: Duration,
    #[serde(default)]
    escalate: BTreeMap<u64, Duration>,
    #[serde(default = "default_true")]
    success_reset: bool,
}

impl AttemptPolicy {
    /// Creates an attempt policy.
    ///
    /// # Panics
    ///
    /// Panics if `window` or `lock` is zero, or if `max` is zero.
    #[must_use]
    pub fn new(window: Duration, max: u64, lock: Duration) -> Self {
        assert!(!window.is_zero(), "window must be non-zero");
        assert!(max >= 1, "max must be at least 1");
        assert!(!lock.is_zero(), "lock must be non-zero");
        Self { window, max, lock, escalate: BTreeMap::new(), success_reset: true }
    }

    /// Sets the strike-count → lock-duration escalation table.
    #[must_use]
    pub fn with_escalate(mut self, escalate: BTreeMap<u64, Duration>) -> Self {
        self.escalate = escalate;
        self
    }

    /// Controls whether a successful attempt clears the failure window.
    #[must_use]
    pub fn with_success_reset(mut self, success_reset: bool) -> Self {
        self.success_reset = success_reset;
        self
    }

    /// Returns the rolling failure window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the failure budget within the window.
    #[must_use]
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Returns the base lock duration.
    #[must_use]
    pub fn lock(&self) -> Duration {
        self.lock
    }

    /// Returns the escalation table.
    #[must_use]
    pub fn escalate(&self) -> &BTreeMap<u64, Duration> {
        &self.escalate
    }

    /// Returns whether success clears the failure window.
    #[must_use]
    pub fn success_reset(&self) -> bool {
        self.success_reset
    }

    /// Selects the lock duration for the given cumulative strike count.
    #[must_use]
    pub fn lock_for_strikes(&self, strikes: u64) -> Duration {
        self.escalate
            .range(..=strikes)
            .next_back()
            .map(|(_, d)| *d)
            .unwrap_or(self.lock)
    }
}
