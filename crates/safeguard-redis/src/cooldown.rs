//! Redis-backed cooldown gate.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use safeguard_core::{
    CooldownGuard, CooldownPolicy, CooldownTicket, Key, SafeguardError, SafeguardResult,
};

use crate::{keys::KeyBuilder, millis};

/// Single-flag gate implemented as `SET NX PX` — the store's set-if-absent
/// with expiry is already atomic, so no procedure is needed.
#[derive(Clone)]
pub struct RedisCooldownGuard {
    conn: ConnectionManager,
    keys: KeyBuilder,
}

impl fmt::Debug for RedisCooldownGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCooldownGuard").field("keys", &self.keys).finish_non_exhaustive()
    }
}

impl RedisCooldownGuard {
    /// Creates a gate over the given connection.
    #[must_use]
    pub fn new(conn: ConnectionManager, keys: KeyBuilder) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl CooldownGuard for RedisCooldownGuard {
    async fn acquire(&self, key: &Key, policy: &CooldownPolicy) -> SafeguardResult<CooldownTicket> {
        let flag = self.keys.cooldown(key);
        let ttl_ms = millis(policy.ttl());
        let mut conn = self.conn.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(&flag)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| SafeguardError::store_with_source("cooldown acquire failed", e))?;
        let acquired = set.is_some();

        let pttl: i64 = redis::cmd("PTTL")
            .arg(&flag)
            .query_async(&mut conn)
            .await
            .map_err(|e| SafeguardError::store_with_source("cooldown ttl read failed", e))?;
        // -2: the flag vanished between the two commands. If we acquired it,
        // report the full TTL; otherwise the previous holder just expired.
        let remaining_ms = match pttl {
            -2 => {
                if acquired {
                    ttl_ms
                } else {
                    0
                }
            }
            t if t < 0 => 0,
            t => u64::try_from(t).unwrap_or(0),
        };

        Ok(CooldownTicket { acquired, remaining: Duration::from_millis(remaining_ms) })
    }

    async fn release(&self, key: &Key) -> SafeguardResult<()> {
        let flag = self.keys.cooldown(key);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&flag)
            .query_async(&mut conn)
            .await
            .map_err(|e| SafeguardError::store_with_source("cooldown release failed", e))?;
        Ok(())
    }
}
