//! Redis-backed idempotency manager.
//!
//! The record is a hash `{status, type, body}` under the idempotency key;
//! `body` holds the raw payload bytes (the client is binary-safe, so no
//! text encoding is needed). Reads are plain `HGETALL`; every mutation
//! that must be indivisible — acquire, save-success, status touch — runs
//! as an atomic procedure.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use safeguard_core::{
    IdempotencyManager, IdempotencyPolicy, IdempotencyRecord, IdempotencyStatus, Key,
    SafeguardError, SafeguardResult,
};
use tracing::warn;

use crate::{
    keys::KeyBuilder,
    millis,
    script::{ScriptArg, ScriptExecutor},
    scripts,
};

const ACQUIRE: &str = "idem_acquire";
const SUCCESS: &str = "idem_success";
const TOUCH: &str = "idem_touch";

/// Per-key idempotency state machine backed by the store.
#[derive(Clone)]
pub struct RedisIdempotencyManager {
    conn: ConnectionManager,
    scripts: Arc<ScriptExecutor>,
    keys: KeyBuilder,
}

impl fmt::Debug for RedisIdempotencyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisIdempotencyManager")
            .field("scripts", &self.scripts)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisIdempotencyManager {
    /// Creates a manager, registering its procedures with the executor.
    #[must_use]
    pub fn new(conn: ConnectionManager, scripts: Arc<ScriptExecutor>, keys: KeyBuilder) -> Self {
        scripts.register(ACQUIRE, scripts::IDEM_ACQUIRE);
        scripts.register(SUCCESS, scripts::IDEM_SUCCESS);
        scripts.register(TOUCH, scripts::IDEM_TOUCH);
        Self { conn, scripts, keys }
    }
}

#[async_trait]
impl IdempotencyManager for RedisIdempotencyManager {
    async fn get(&self, key: &Key) -> SafeguardResult<Option<IdempotencyRecord>> {
        let record_key = self.keys.idempotency(key);
        let mut conn = self.conn.clone();

        let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(&record_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SafeguardError::store_with_source("idempotency read failed", e))?;
        if fields.is_empty() {
            return Ok(None);
        }

        let status = fields
            .get("status")
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse::<IdempotencyStatus>().ok());
        let Some(status) = status else {
            // Unparseable record: delete it and treat the key as absent so
            // callers can proceed with a fresh attempt.
            warn!(key = %key, "corrupt idempotency record, deleting");
            let _: () = redis::cmd("DEL")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| SafeguardError::store_with_source("idempotency delete failed", e))?;
            return Ok(None);
        };

        let payload_type = fields
            .get("type")
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(str::to_owned);
        let payload = fields
            .get("body")
            .filter(|raw| !raw.is_empty())
            .map(|raw| Bytes::copy_from_slice(raw));

        Ok(Some(IdempotencyRecord { status, payload_type, payload }))
    }

    async fn try_acquire_pending(
        &self,
        key: &Key,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<bool> {
        let record_key = self.keys.idempotency(key);
        let args = [ScriptArg::Uint(millis(policy.ttl()))];
        let acquired = self.scripts.eval_int(ACQUIRE, &[record_key.as_str()], &args).await?;
        Ok(acquired == 1)
    }

    async fn save_success(
        &self,
        key: &Key,
        record: IdempotencyRecord,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()> {
        let record_key = self.keys.idempotency(key);
        let args = [
            ScriptArg::Uint(millis(policy.ttl())),
            ScriptArg::Str(record.payload_type.unwrap_or_default()),
            ScriptArg::Bytes(record.payload.unwrap_or_default()),
        ];
        let _ = self.scripts.eval_int(SUCCESS, &[record_key.as_str()], &args).await?;
        Ok(())
    }

    async fn clear(&self, key: &Key) -> SafeguardResult<()> {
        let record_key = self.keys.idempotency(key);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&record_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SafeguardError::store_with_source("idempotency clear failed", e))?;
        Ok(())
    }

    async fn update_status(
        &self,
        key: &Key,
        status: IdempotencyStatus,
        policy: &IdempotencyPolicy,
    ) -> SafeguardResult<()> {
        let record_key = self.keys.idempotency(key);
        let args =
            [ScriptArg::Uint(millis(policy.ttl())), ScriptArg::Str(status.as_str().to_owned())];
        let _ = self.scripts.eval_int(TOUCH, &[record_key.as_str()], &args).await?;
        Ok(())
    }
}
