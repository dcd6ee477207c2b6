//! Ephemeral guard outcomes and the persisted idempotency record.

use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;

/// Outcome of one token-bucket admission attempt.
///
/// Produced per call and owned by the caller. A denied result carries a
/// `retry_after` hint: the time until enough tokens will have accumulated
/// to satisfy the request, as computed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the requested tokens were consumed.
    pub allowed: bool,
    /// Tokens left in the bucket after this attempt.
    pub remaining: u64,
    /// For denied attempts, how long until the request could succeed.
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// An admitted result with the given remaining token count.
    #[must_use]
    pub fn allowed(remaining: u64) -> Self {
        Self { allowed: true, remaining, retry_after: None }
    }

    /// A denied result with an optional retry hint.
    #[must_use]
    pub fn denied(remaining: u64, retry_after: Option<Duration>) -> Self {
        Self { allowed: false, remaining, retry_after }
    }
}

/// Outcome of one cooldown acquisition attempt.
///
/// When `acquired` is false, `remaining` is the time left on the flag that
/// blocked the acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownTicket {
    /// Whether the cooldown flag was set by this call.
    pub acquired: bool,
    /// Time left on the flag (the full TTL when freshly acquired).
    pub remaining: Duration,
}

impl CooldownTicket {
    /// Returns the remaining cooldown in whole milliseconds.
    #[must_use]
    pub fn remaining_millis(&self) -> u64 {
        u64::try_from(self.remaining.as_millis()).unwrap_or(u64::MAX)
    }
}

/// State of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// A caller has acquired the key and the operation is in flight.
    Pending,
    /// The operation completed; the record may carry a cached payload.
    Success,
}

impl IdempotencyStatus {
    /// Returns the canonical wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            _ => Err(()),
        }
    }
}

/// The per-key idempotency record.
///
/// The canonical copy lives in the shared store keyed by
/// [`Key::full`](crate::Key::full) and is mutated only through atomic
/// store operations. Created as [`Pending`](IdempotencyStatus::Pending)
/// when a caller first acquires the key; transitions to
/// [`Success`](IdempotencyStatus::Success) with a cached payload when the
/// protected operation completes; deleted on failure so a retry can
/// proceed; expires after the policy TTL if never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Current state of the record.
    pub status: IdempotencyStatus,
    /// Diagnostic hint naming the cached payload's type, if any.
    pub payload_type: Option<String>,
    /// Serialized result of the protected operation, if any.
    pub payload: Option<Bytes>,
}

impl IdempotencyRecord {
    /// A fresh PENDING record with no payload.
    #[must_use]
    pub fn pending() -> Self {
        Self { status: IdempotencyStatus::Pending, payload_type: None, payload: None }
    }

    /// A SUCCESS record carrying a serialized payload.
    #[must_use]
    pub fn success(payload_type: Option<String>, payload: Option<Bytes>) -> Self {
        Self { status: IdempotencyStatus::Success, payload_type, payload }
    }
}

/// Outcome of one attempt-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCheck {
    /// Whether the attempt may proceed.
    pub allowed: bool,
    /// Time left on the current failure window, if one is open.
    pub attempts_ttl: Duration,
    /// Time left on the lock, when the key is locked.
    pub lock_ttl: Duration,
}

impl AttemptCheck {
    /// An all-clear result.
    #[must_use]
    pub fn allowed(attempts_ttl: Duration) -> Self {
        Self { allowed: true, attempts_ttl, lock_ttl: Duration::ZERO }
    }

    /// A locked-out result.
    #[must_use]
    pub fn locked(lock_ttl: Duration) -> Self {
        Self { allowed: false, attempts_ttl: Duration::ZERO, lock_ttl }
    }

    /// How long the caller should wait before retrying: the lock TTL when
    /// locked, otherwise the window TTL.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        if self.lock_ttl > Duration::ZERO { self.lock_ttl } else { self.attempts_ttl }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_name() {
        for status in [IdempotencyStatus::Pending, IdempotencyStatus::Success] {
            assert_eq!(status.as_str().parse::<IdempotencyStatus>(), Ok(status));
        }
        assert!("DONE".parse::<IdempotencyStatus>().is_err());
    }

    #[test]
    fn ticket_reports_millis() {
        let ticket = CooldownTicket { acquired: false, remaining: Duration::from_millis(1500) };
        assert_eq!(ticket.remaining_millis(), 1500);
    }

    #[test]
    fn attempt_check_retry_after_prefers_lock() {
        let locked = AttemptCheck::locked(Duration::from_secs(60));
        assert_eq!(locked.retry_after(), Duration::from_secs(60));

        let open = AttemptCheck::allowed(Duration::from_secs(10));
        assert_eq!(open.retry_after(), Duration::from_secs(10));
    }
}
