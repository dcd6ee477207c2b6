//! Redis-backed attempt-limit manager.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use safeguard_core::{
    AttemptCheck, AttemptLimitManager, AttemptPolicy, Key, SafeguardError, SafeguardResult,
};

use crate::{
    keys::KeyBuilder,
    millis,
    script::{ScriptArg, ScriptExecutor},
    scripts,
};

const ATTEMPT: &str = "attempt_limit";

/// Failure-window lockout over a three-key family (window counter, lock
/// flag, strike counter) driven by one atomic procedure.
#[derive(Debug, Clone)]
pub struct RedisAttemptLimitManager {
    scripts: Arc<ScriptExecutor>,
    keys: KeyBuilder,
}

impl RedisAttemptLimitManager {
    /// Creates a manager, registering its procedure with the executor.
    #[must_use]
    pub fn new(scripts: Arc<ScriptExecutor>, keys: KeyBuilder) -> Self {
        scripts.register(ATTEMPT, scripts::ATTEMPT_LIMIT);
        Self { scripts, keys }
    }

    async fn run(
        &self,
        key: &Key,
        policy: &AttemptPolicy,
        is_success: bool,
        peek_only: bool,
    ) -> SafeguardResult<AttemptCheck> {
        let window = self.keys.attempt_window(key);
        let lock = self.keys.attempt_lock(key);
        let strikes = self.keys.attempt_strikes(key);
        let args = [
            ScriptArg::Uint(millis(policy.window())),
            ScriptArg::Uint(policy.max()),
            ScriptArg::Uint(millis(policy.lock())),
            ScriptArg::Str(escalate_csv(policy)),
            ScriptArg::Uint(u64::from(is_success)),
            ScriptArg::Uint(1),
            ScriptArg::Uint(u64::from(peek_only)),
        ];

        let reply = self
            .scripts
            .eval_ints(ATTEMPT, &[window.as_str(), lock.as_str(), strikes.as_str()], &args)
            .await?;
        let [allowed, attempts_ttl_ms, lock_ttl_ms] = reply[..] else {
            return Err(SafeguardError::store(format!(
                "unexpected attempt reply of length {}",
                reply.len()
            )));
        };

        let allowed = allowed == 1;
        Ok(AttemptCheck {
            allowed,
            attempts_ttl: if allowed { to_duration(attempts_ttl_ms) } else { Duration::ZERO },
            lock_ttl: to_duration(lock_ttl_ms),
        })
    }
}

#[async_trait]
impl AttemptLimitManager for RedisAttemptLimitManager {
    async fn on_check(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        self.run(key, policy, false, true).await
    }

    async fn on_fail(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        self.run(key, policy, false, false).await
    }

    async fn on_success(&self, key: &Key, policy: &AttemptPolicy) -> SafeguardResult<AttemptCheck> {
        self.run(key, policy, true, false).await
    }
}

/// Renders the escalation table as ascending `strikes=lock_ms` pairs.
fn escalate_csv(policy: &AttemptPolicy) -> String {
    policy
        .escalate()
        .iter()
        .map(|(strikes, lock)| format!("{strikes}={}", lock.as_millis()))
        .collect::<Vec<_>>()
        .join(",")
}

fn to_duration(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}
