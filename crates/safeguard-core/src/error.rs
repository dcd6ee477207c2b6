//! Error taxonomy and result alias.
//!
//! The taxonomy is closed and exhaustive over guard outcomes: rate-limit
//! rejection, cooldown-active rejection, idempotency conflict, the
//! replay-from-record control-flow signal, and attempt-limit lockout. Two
//! ambient variants ([`Store`](SafeguardError::Store) and
//! [`Codec`](SafeguardError::Codec)) carry collaborator failures with
//! their source chain preserved.
//!
//! Every guard variant carries the offending [`Key`] and exposes a stable
//! [`code`](SafeguardError::code) string so service boundaries can
//! translate each kind to a distinct response (429 for rate limit, 409 for
//! cooldown/idempotency conflict, 200-with-cached-body for replay).

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{key::Key, model::IdempotencyRecord};

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for guard operations.
pub type SafeguardResult<T> = Result<T, SafeguardError>;

/// Errors raised by guards and their collaborators.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` — new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SafeguardError {
    /// The token bucket had fewer tokens than the request needed.
    #[error("rate limit exceeded: {key}")]
    RateLimitExceeded {
        /// The key whose bucket was exhausted.
        key: Key,
        /// Time until the request could succeed, when the store computed one.
        retry_after: Option<Duration>,
    },

    /// A cooldown flag is active for the key.
    #[error("cooldown active: {key}")]
    CooldownActive {
        /// The key under cooldown.
        key: Key,
        /// Time left on the active flag.
        remaining: Duration,
    },

    /// A concurrent caller holds the key (PENDING) or won the acquisition
    /// race; the duplicate call must not run.
    #[error("idempotency conflict: {key}")]
    IdempotencyConflict {
        /// The contended key.
        key: Key,
    },

    /// Not a failure: a completed record exists and its cached result
    /// should be returned instead of re-running the work. Surfaced when
    /// the payload cannot be decoded into the caller's type, so the
    /// caller can handle the raw record.
    #[error("return value from record: {key}")]
    IdempotencyReplay {
        /// The key whose record resolved.
        key: Key,
        /// The stored SUCCESS record.
        record: IdempotencyRecord,
    },

    /// The failure budget for the key is exhausted and the key is locked.
    #[error("attempt limit exceeded: {key}")]
    AttemptLimitExceeded {
        /// The locked key.
        key: Key,
        /// Time until the lock (or failure window) clears.
        retry_after: Duration,
    },

    /// Shared-store failure (connection, script execution, protocol).
    ///
    /// Callers must not assume partial effects occurred.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
        /// The underlying error, when available.
        #[source]
        source: Option<BoxError>,
    },

    /// Payload serialization or deserialization failure.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
        /// The underlying error, when available.
        #[source]
        source: Option<BoxError>,
    },
}

impl SafeguardError {
    /// Creates a `RateLimitExceeded` error.
    #[must_use]
    pub fn rate_limit_exceeded(key: Key, retry_after: Option<Duration>) -> Self {
        Self::RateLimitExceeded { key, retry_after }
    }

    /// Creates a `CooldownActive` error.
    #[must_use]
    pub fn cooldown_active(key: Key, remaining: Duration) -> Self {
        Self::CooldownActive { key, remaining }
    }

    /// Creates an `IdempotencyConflict` error.
    #[must_use]
    pub fn idempotency_conflict(key: Key) -> Self {
        Self::IdempotencyConflict { key }
    }

    /// Creates an `IdempotencyReplay` signal carrying the stored record.
    #[must_use]
    pub fn idempotency_replay(key: Key, record: IdempotencyRecord) -> Self {
        Self::IdempotencyReplay { key, record }
    }

    /// Creates an `AttemptLimitExceeded` error.
    #[must_use]
    pub fn attempt_limit_exceeded(key: Key, retry_after: Duration) -> Self {
        Self::AttemptLimitExceeded { key, retry_after }
    }

    /// Creates a `Store` error with the given message.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into(), source: None }
    }

    /// Creates a `Store` error with a message and source error.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Codec` error with the given message.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec { message: message.into(), source: None }
    }

    /// Creates a `Codec` error with a message and source error.
    #[must_use]
    pub fn codec_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Codec { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns the stable code string for downstream translation.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::IdempotencyReplay { .. } => "RETURN_VALUE_FROM_RECORD",
            Self::AttemptLimitExceeded { .. } => "ATTEMPT_LIMIT_EXCEEDED",
            Self::Store { .. } => "STORE_ERROR",
            Self::Codec { .. } => "CODEC_ERROR",
        }
    }

    /// Returns the offending key, for variants that carry one.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::RateLimitExceeded { key, .. }
            | Self::CooldownActive { key, .. }
            | Self::IdempotencyConflict { key }
            | Self::IdempotencyReplay { key, .. }
            | Self::AttemptLimitExceeded { key, .. } => Some(key),
            Self::Store { .. } | Self::Codec { .. } => None,
        }
    }
}
