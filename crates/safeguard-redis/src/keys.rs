//! Physical key layout in the store.
//!
//! Every guard namespaces its state under a configurable prefix plus a
//! short guard tag, so one store instance can serve several deployments
//! without collisions:
//!
//! | Guard        | Physical key                      |
//! |--------------|-----------------------------------|
//! | rate limiter | `<prefix>:rl:<namespace>:<value>` |
//! | cooldown     | `<prefix>:cd:<namespace>:<value>` |
//! | idempotency  | `<prefix>:id:<namespace>:<value>` |
//! | attempts     | `<prefix>:al:<kind>:<namespace>:<value>` |
//!
//! The attempt guard owns a family of three keys (`window`, `lock`,
//! `strikes`) derived from the same logical key.

use safeguard_core::Key;

/// Default physical key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "sg";

/// Maps logical keys to physical store keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Creates a builder with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Returns the rate-limit bucket key.
    #[must_use]
    pub fn rate_limit(&self, key: &Key) -> String {
        format!("{}:rl:{}", self.prefix, key.full())
    }

    /// Returns the cooldown flag key.
    #[must_use]
    pub fn cooldown(&self, key: &Key) -> String {
        format!("{}:cd:{}", self.prefix, key.full())
    }

    /// Returns the idempotency record key.
    #[must_use]
    pub fn idempotency(&self, key: &Key) -> String {
        format!("{}:id:{}", self.prefix, key.full())
    }

    /// Returns the attempt failure-window key.
    #[must_use]
    pub fn attempt_window(&self, key: &Key) -> String {
        self.attempt(key, "window")
    }

    /// Returns the attempt lock key.
    #[must_use]
    pub fn attempt_lock(&self, key: &Key) -> String {
        self.attempt(key, "lock")
    }

    /// Returns the attempt strike-counter key.
    #[must_use]
    pub fn attempt_strikes(&self, key: &Key) -> String {
        self.attempt(key, "strikes")
    }

    fn attempt(&self, key: &Key, kind: &str) -> String {
        format!("{}:al:{}:{}", self.prefix, kind, key.full())
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_per_guard() {
        let keys = KeyBuilder::default();
        let key = Key::new("email.send", "user@example.com");

        assert_eq!(keys.rate_limit(&key), "sg:rl:email.send:user@example.com");
        assert_eq!(keys.cooldown(&key), "sg:cd:email.send:user@example.com");
        assert_eq!(keys.idempotency(&key), "sg:id:email.send:user@example.com");
        assert_eq!(keys.attempt_lock(&key), "sg:al:lock:email.send:user@example.com");
    }

    #[test]
    fn custom_prefix_isolates_deployments() {
        let keys = KeyBuilder::new("staging");
        let key = Key::new("ns", "v");
        assert_eq!(keys.rate_limit(&key), "staging:rl:ns:v");
    }

    #[test]
    fn attempt_key_family_shares_the_logical_key() {
        let keys = KeyBuilder::default();
        let key = Key::new("login", "alice");
        let family =
            [keys.attempt_window(&key), keys.attempt_lock(&key), keys.attempt_strikes(&key)];
        for physical in &family {
            assert!(physical.ends_with("login:alice"), "key: {physical}");
        }
        assert_eq!(family.iter().collect::<std::collections::HashSet<_>>().len(), 3);
    }
}
