//! Distributed concurrency-control guards for operations identified by a
//! logical key.
//!
//! This crate is the store-agnostic core of the safeguard stack: it
//! protects an operation from being executed too often (rate limiting),
//! too soon again (cooldown gating), more than once concurrently
//! (idempotency management), or too many times after failing (attempt
//! limits). Guard state lives in a shared store; in distributed
//! deployments the store's per-key atomicity — not in-process locking —
//! is the sole source of mutual exclusion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller / Service                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Safeguard facade                        │
//! │   with_rate_limit │ with_cooldown │ with_idempotency │ …    │
//! │        (check → execute → commit/rollback → signal)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       Guard traits                          │
//! │  RateLimiter │ CooldownGuard │ IdempotencyManager │ Attempt │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │  memory::*   │              safeguard-redis                 │
//! │ (tests, dev) │      (atomic Lua procedures, production)     │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use safeguard_core::{IdempotencyPolicy, Key, Safeguard, SafeguardError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let safeguard = Safeguard::in_memory();
//! let key = Key::new("order.create", "order-42");
//! let policy = IdempotencyPolicy::new(Duration::from_secs(300));
//!
//! // The work runs exactly once; duplicate calls replay the cached result.
//! let first: Result<String, SafeguardError> = safeguard
//!     .with_idempotency(&key, &policy, || async { Ok("receipt-1".to_string()) })
//!     .await;
//! let second: Result<String, SafeguardError> = safeguard
//!     .with_idempotency(&key, &policy, || async { Ok("receipt-2".to_string()) })
//!     .await;
//!
//! assert_eq!(first.unwrap(), "receipt-1");
//! assert_eq!(second.unwrap(), "receipt-1"); // replayed, not re-executed
//! # });
//! ```
//!
//! # Error Handling
//!
//! Guard rejections are typed [`SafeguardError`] values carrying the
//! offending [`Key`] and a stable [`code`](SafeguardError::code) string,
//! so a service boundary can translate each kind to a distinct response
//! (429 for rate limit, 409 for cooldown/idempotency conflict,
//! 200-with-cached-body for replay). The facade is generic over the
//! caller's error type via `From<SafeguardError>`; work errors propagate
//! unchanged after guard cleanup runs.
//!
//! # Cancellation
//!
//! A caller that abandons a guard check cannot un-ask the store: the
//! token may already be consumed or the PENDING marker acquired. Treat a
//! timed-out check as indeterminate and prefer idempotency semantics over
//! blind retries.
//!
//! # Feature Flags
//!
//! - **`testutil`**: shared test helpers (key generators, the
//!   [`assert_safeguard_error!`] matcher). Enable in `[dev-dependencies]`.

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod facade;
pub mod guard;
pub mod key;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod policy;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use codec::{JsonPayloadCodec, NoopPayloadCodec, PayloadCodec};
pub use error::{BoxError, SafeguardError, SafeguardResult};
pub use facade::Safeguard;
pub use guard::{AttemptLimitManager, CooldownGuard, IdempotencyManager, RateLimiter};
pub use key::Key;
pub use memory::{
    MemoryAttemptLimitManager, MemoryCooldownGuard, MemoryIdempotencyManager, MemoryRateLimiter,
};
pub use metrics::{CounterMetrics, MetricsSnapshot, NoopSafeguardMetrics, SafeguardMetrics};
pub use model::{
    AttemptCheck, CooldownTicket, IdempotencyRecord, IdempotencyStatus, RateLimitResult,
};
pub use policy::{AttemptPolicy, CooldownPolicy, IdemMode, IdempotencyPolicy, RateLimitPolicy};
