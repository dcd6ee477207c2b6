//! The atomic primitive executor: named, pre-registered procedures
//! executed against the store.
//!
//! Guards register each procedure once by logical name; execution goes
//! through `EVALSHA` so only the 40-byte digest crosses the wire on the
//! hot path. The executor keeps an explicit two-tier cache — by logical
//! name and by SHA-1 content hash — and when the store reports the script
//! missing (`NOSCRIPT`, e.g. after a Redis restart dropped its script
//! cache) it retries exactly once with the full `EVAL` body.
//!
//! All reads and writes inside one procedure are indivisible with respect
//! to concurrent invocations on the same key. Failures surface as
//! [`SafeguardError::Store`]; callers must not assume partial effects
//! occurred.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;
use redis::{ErrorKind, aio::ConnectionManager};
use safeguard_core::{SafeguardError, SafeguardResult};
use tracing::{debug, warn};

/// A registered procedure: logical name, content digest, and full body.
#[derive(Debug)]
struct RegisteredScript {
    name: &'static str,
    sha: String,
    body: &'static str,
}

/// A string/byte argument passed to a procedure.
#[derive(Debug, Clone)]
pub enum ScriptArg {
    /// Signed integer argument.
    Int(i64),
    /// Unsigned integer argument.
    Uint(u64),
    /// Text argument.
    Str(String),
    /// Raw byte argument (binary-safe).
    Bytes(Bytes),
}

impl From<i64> for ScriptArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for ScriptArg {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<String> for ScriptArg {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for ScriptArg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<Bytes> for ScriptArg {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

/// Executes named atomic procedures against the store.
///
/// Cheaply cloneable; all clones share the registry and the underlying
/// multiplexed connection.
#[derive(Clone)]
pub struct ScriptExecutor {
    conn: ConnectionManager,
    by_name: Arc<RwLock<HashMap<&'static str, Arc<RegisteredScript>>>>,
    by_sha: Arc<RwLock<HashMap<String, Arc<RegisteredScript>>>>,
}

impl fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("registered", &self.by_name.read().len())
            .finish_non_exhaustive()
    }
}

impl ScriptExecutor {
    /// Creates an executor over the given connection with an empty
    /// registry.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            by_name: Arc::new(RwLock::new(HashMap::new())),
            by_sha: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a procedure under a logical name, returning its SHA-1
    /// digest.
    ///
    /// The digest is computed locally — it is the same value Redis derives
    /// from the body, so `EVALSHA` works whether or not the store has seen
    /// the script yet. Re-registering a name replaces the previous body.
    pub fn register(&self, name: &'static str, body: &'static str) -> String {
        let sha = sha1_smol::Sha1::from(body).digest().to_string();
        let script = Arc::new(RegisteredScript { name, sha: sha.clone(), body });
        self.by_name.write().insert(name, Arc::clone(&script));
        self.by_sha.write().insert(sha.clone(), script);
        sha
    }

    /// Loads every registered procedure into the store's script cache.
    ///
    /// Optional warm-up: execution falls back to `EVAL` on a cache miss
    /// either way.
    pub async fn preload(&self) -> SafeguardResult<()> {
        let scripts: Vec<Arc<RegisteredScript>> =
            self.by_name.read().values().cloned().collect();
        let mut conn = self.conn.clone();
        for script in scripts {
            let loaded: String = redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(script.body)
                .query_async(&mut conn)
                .await
                .map_err(|e| SafeguardError::store_with_source("failed to load script", e))?;
            if loaded != script.sha {
                warn!(script = script.name, local = %script.sha, store = %loaded,
                    "script digest disagreement");
            } else {
                debug!(script = script.name, sha = %loaded, "script loaded");
            }
        }
        Ok(())
    }

    /// Executes a procedure expecting an integer result.
    pub async fn eval_int(
        &self,
        name: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> SafeguardResult<i64> {
        let value = self.eval(name, keys, args).await?;
        redis::from_redis_value(&value)
            .map_err(|e| SafeguardError::store_with_source("unexpected script reply", e))
    }

    /// Executes a procedure expecting an integer-array result.
    pub async fn eval_ints(
        &self,
        name: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> SafeguardResult<Vec<i64>> {
        let value = self.eval(name, keys, args).await?;
        redis::from_redis_value(&value)
            .map_err(|e| SafeguardError::store_with_source("unexpected script reply", e))
    }

    async fn eval(
        &self,
        name: &str,
        keys: &[&str],
        args: &[ScriptArg],
    ) -> SafeguardResult<redis::Value> {
        let script = self.lookup(name)?;
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(script.sha.as_str());
        apply_keys_and_args(&mut cmd, keys, args);

        let result: Result<redis::Value, redis::RedisError> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                // The store dropped its script cache; retry once with the
                // full body, which also re-caches it server-side.
                warn!(script = script.name, "script missing from store, retrying with full body");
                let mut cmd = redis::cmd("EVAL");
                cmd.arg(script.body);
                apply_keys_and_args(&mut cmd, keys, args);
                let value: redis::Value = cmd
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| SafeguardError::store_with_source("script execution failed", e))?;
                Ok(value)
            }
            Err(err) => {
                Err(SafeguardError::store_with_source("script execution failed", err))
            }
        }
    }

    fn lookup(&self, name: &str) -> SafeguardResult<Arc<RegisteredScript>> {
        self.by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SafeguardError::store(format!("script not registered: {name}")))
    }
}

fn apply_keys_and_args(cmd: &mut redis::Cmd, keys: &[&str], args: &[ScriptArg]) {
    cmd.arg(keys.len());
    for key in keys {
        cmd.arg(*key);
    }
    for arg in args {
        match arg {
            ScriptArg::Int(v) => cmd.arg(*v),
            ScriptArg::Uint(v) => cmd.arg(*v),
            ScriptArg::Str(v) => cmd.arg(v.as_str()),
            ScriptArg::Bytes(v) => cmd.arg(&v[..]),
        };
    }
}
