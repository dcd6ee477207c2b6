//! Configuration for the Redis-backed guards.

use serde::{Deserialize, Serialize};

use crate::keys::DEFAULT_KEY_PREFIX;

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_owned()
}

/// Configuration for [`RedisGuardSet`](crate::RedisGuardSet).
///
/// # Example
///
/// ```
/// use safeguard_redis::RedisSafeguardConfig;
///
/// let config: RedisSafeguardConfig = serde_json::from_str(r#"{}"#).unwrap();
/// assert_eq!(config.key_prefix, "sg");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisSafeguardConfig {
    /// Prefix for all physical keys (default: `"sg"`). Give each
    /// deployment sharing a store its own prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisSafeguardConfig {
    fn default() -> Self {
        Self { key_prefix: default_key_prefix() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefix_is_sg() {
        assert_eq!(RedisSafeguardConfig::default().key_prefix, "sg");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<RedisSafeguardConfig, _> =
            serde_json::from_str(r#"{"key_prefix": "x", "typo": true}"#);
        assert!(result.is_err());
    }
}
