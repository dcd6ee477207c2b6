//! Redis-backed implementations of the safeguard guard traits.
//!
//! This crate provides production guards whose state lives in Redis:
//! callers in different processes racing on the same key are serialized
//! by the store's per-key atomicity, with every read-modify-write running
//! as one Lua procedure through the [`ScriptExecutor`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Safeguard facade                        │
//! │                     (safeguard-core)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RedisRateLimiter │ RedisCooldownGuard │ RedisIdempotency…  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      ScriptExecutor                         │
//! │   named procedures │ two-tier cache │ NOSCRIPT reload       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                          Redis                              │
//! │        single-threaded script execution per key             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use safeguard_core::{Key, RateLimitPolicy, SafeguardError};
//! use safeguard_redis::RedisGuardSet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SafeguardError> {
//!     let safeguard = RedisGuardSet::connect("redis://127.0.0.1/")
//!         .await?
//!         .into_safeguard();
//!
//!     let key = Key::new("email.send", "user@example.com");
//!     let policy = RateLimitPolicy::new(10, 1, Duration::from_secs(1));
//!     let out: Result<&str, SafeguardError> = safeguard
//!         .with_rate_limit(&key, &policy, || async { Ok("sent") })
//!         .await;
//!     println!("{:?}", out);
//!     Ok(())
//! }
//! ```
//!
//! # Consistency Model
//!
//! Linearizability holds per key: two concurrent invocations referencing
//! the same key never interleave their internal steps. No cross-key
//! atomicity is promised — each guard touches a single logical key (the
//! attempt guard's three physical keys form one key family mutated by one
//! procedure call).
//!
//! # Failure Handling
//!
//! Store failures surface as
//! [`SafeguardError::Store`](safeguard_core::SafeguardError) with the
//! source preserved; nothing is retried internally except the script
//! executor's single `NOSCRIPT` reload.

#![deny(unsafe_code)]

pub mod attempt;
pub mod config;
pub mod cooldown;
pub mod idem;
pub mod keys;
pub mod rate_limiter;
pub mod script;
mod scripts;

use std::{sync::Arc, time::Duration};

use redis::aio::ConnectionManager;
use safeguard_core::{JsonPayloadCodec, Safeguard, SafeguardError, SafeguardResult};
use tracing::warn;

pub use attempt::RedisAttemptLimitManager;
pub use config::RedisSafeguardConfig;
pub use cooldown::RedisCooldownGuard;
pub use idem::RedisIdempotencyManager;
pub use keys::{DEFAULT_KEY_PREFIX, KeyBuilder};
pub use rate_limiter::RedisRateLimiter;
pub use script::{ScriptArg, ScriptExecutor};

/// Durations cross the wire in whole milliseconds.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The full set of Redis-backed guards over one connection.
///
/// Construct via [`connect`](RedisGuardSet::connect) and either use the
/// guards directly or wire them into a facade with
/// [`into_safeguard`](RedisGuardSet::into_safeguard).
#[derive(Debug, Clone)]
pub struct RedisGuardSet {
    /// Token-bucket rate limiter.
    pub rate_limiter: Arc<RedisRateLimiter>,
    /// Cooldown gate.
    pub cooldown: Arc<RedisCooldownGuard>,
    /// Idempotency manager.
    pub idempotency: Arc<RedisIdempotencyManager>,
    /// Attempt-limit manager.
    pub attempts: Arc<RedisAttemptLimitManager>,
    scripts: Arc<ScriptExecutor>,
}

impl RedisGuardSet {
    /// Connects to Redis with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Store` error when the URL is invalid or the connection
    /// cannot be established.
    pub async fn connect(url: &str) -> SafeguardResult<Self> {
        Self::connect_with_config(url, RedisSafeguardConfig::default()).await
    }

    /// Connects to Redis with a custom configuration.
    ///
    /// Registered procedures are preloaded into the store's script cache;
    /// a preload failure is logged and tolerated since execution falls
    /// back to `EVAL` on a cache miss.
    pub async fn connect_with_config(
        url: &str,
        config: RedisSafeguardConfig,
    ) -> SafeguardResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SafeguardError::store_with_source("invalid redis url", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SafeguardError::store_with_source("failed to connect to redis", e))?;

        let set = Self::from_connection(conn, config);
        if let Err(err) = set.scripts.preload().await {
            warn!(error = %err, "script preload failed; execution will fall back to EVAL");
        }
        Ok(set)
    }

    /// Builds the guard set over an existing connection.
    #[must_use]
    pub fn from_connection(conn: ConnectionManager, config: RedisSafeguardConfig) -> Self {
        let keys = KeyBuilder::new(config.key_prefix);
        let scripts = Arc::new(ScriptExecutor::new(conn.clone()));

        Self {
            rate_limiter: Arc::new(RedisRateLimiter::new(Arc::clone(&scripts), keys.clone())),
            cooldown: Arc::new(RedisCooldownGuard::new(conn.clone(), keys.clone())),
            idempotency: Arc::new(RedisIdempotencyManager::new(
                conn,
                Arc::clone(&scripts),
                keys.clone(),
            )),
            attempts: Arc::new(RedisAttemptLimitManager::new(Arc::clone(&scripts), keys)),
            scripts,
        }
    }

    /// Returns the script executor, for callers registering their own
    /// procedures.
    #[must_use]
    pub fn scripts(&self) -> &Arc<ScriptExecutor> {
        &self.scripts
    }

    /// Wires the guards into a [`Safeguard`] facade with the JSON payload
    /// codec.
    #[must_use]
    pub fn into_safeguard(self) -> Safeguard {
        Safeguard::new(self.rate_limiter, self.cooldown, self.idempotency)
            .with_attempt_limits(self.attempts)
            .with_codec(Arc::new(JsonPayloadCodec))
    }
}
