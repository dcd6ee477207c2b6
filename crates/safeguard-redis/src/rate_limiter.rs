//! Redis-backed token-bucket rate limiter.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use safeguard_core::{
    Key, RateLimitPolicy, RateLimitResult, RateLimiter, SafeguardError, SafeguardResult,
};

use crate::{
    keys::KeyBuilder,
    millis,
    script::{ScriptArg, ScriptExecutor},
    scripts,
};

const CONSUME: &str = "rate_limit_consume";
const REFUND: &str = "rate_limit_refund";

/// Token-bucket admission control whose state lives in the store.
///
/// Refill arithmetic runs inside one atomic procedure against the server
/// clock, so callers in different processes share a single bucket and a
/// single time base. Bucket state is a hash `{tokens, ts}` that expires
/// once idle long enough to refill completely.
#[derive(Debug, Clone)]
pub struct RedisRateLimiter {
    scripts: Arc<ScriptExecutor>,
    keys: KeyBuilder,
}

impl RedisRateLimiter {
    /// Creates a limiter, registering its procedures with the executor.
    #[must_use]
    pub fn new(scripts: Arc<ScriptExecutor>, keys: KeyBuilder) -> Self {
        scripts.register(CONSUME, scripts::RATE_LIMIT_CONSUME);
        scripts.register(REFUND, scripts::RATE_LIMIT_REFUND);
        Self { scripts, keys }
    }

    fn policy_args(policy: &RateLimitPolicy) -> [ScriptArg; 4] {
        [
            ScriptArg::Uint(policy.capacity()),
            ScriptArg::Uint(policy.refill_tokens()),
            ScriptArg::Uint(millis(policy.refill_period())),
            ScriptArg::Uint(policy.requested()),
        ]
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_consume(
        &self,
        key: &Key,
        policy: &RateLimitPolicy,
    ) -> SafeguardResult<RateLimitResult> {
        let bucket = self.keys.rate_limit(key);
        let reply = self
            .scripts
            .eval_ints(CONSUME, &[bucket.as_str()], &Self::policy_args(policy))
            .await?;
        let [allowed, remaining, wait_ms] = reply[..] else {
            return Err(SafeguardError::store(format!(
                "unexpected consume reply of length {}",
                reply.len()
            )));
        };

        let allowed = allowed == 1;
        let remaining = u64::try_from(remaining).unwrap_or(0);
        let retry_after = (!allowed && wait_ms > 0)
            .then(|| Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0)));
        Ok(RateLimitResult { allowed, remaining, retry_after })
    }

    async fn refund(
        &self,
        key: &Key,
        amount: u64,
        policy: &RateLimitPolicy,
    ) -> SafeguardResult<u64> {
        let bucket = self.keys.rate_limit(key);
        let args = [ScriptArg::Uint(policy.capacity()), ScriptArg::Uint(amount)];
        let credited = self.scripts.eval_int(REFUND, &[bucket.as_str()], &args).await?;
        Ok(u64::try_from(credited).unwrap_or(0))
    }
}
