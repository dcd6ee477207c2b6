//! Logical keys identifying protected resources.
//!
//! A [`Key`] names one instance of a protected operation: the `namespace`
//! identifies the operation class (e.g. `"email.send"`, `"order.create"`)
//! and the `value` identifies the instance within it (e.g. a recipient
//! address or an order id). Guards never interpret the contents — two keys
//! are the same resource iff both fields match.
//!
//! How a key is derived from a request is the caller's concern: resolve it
//! once per guarded call, before any guard executes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the resource instance a guard protects.
///
/// Immutable value type. [`full`](Key::full) renders the canonical string
/// form used as the physical key in the shared store.
///
/// # Example
///
/// ```
/// use safeguard_core::Key;
///
/// let key = Key::new("email.send", "user@example.com");
/// assert_eq!(key.full(), "email.send:user@example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    namespace: String,
    value: String,
}

impl Key {
    /// Creates a key from a namespace and a value.
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), value: value.into() }
    }

    /// Returns the operation-class namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the instance value within the namespace.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the canonical `namespace:value` form.
    #[must_use]
    pub fn full(&self) -> String {
        format!("{}:{}", self.namespace, self.value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_renders_canonical_form() {
        let key = Key::new("order.create", "42");
        assert_eq!(key.full(), "order.create:42");
        assert_eq!(key.to_string(), key.full());
    }

    #[test]
    fn equality_is_field_wise() {
        assert_eq!(Key::new("a", "b"), Key::new("a", "b"));
        assert_ne!(Key::new("a", "b"), Key::new("a", "c"));
        assert_ne!(Key::new("a", "b"), Key::new("x", "b"));
    }

    #[test]
    fn accessors_return_fields() {
        let key = Key::new("email.send", "user@example.com");
        assert_eq!(key.namespace(), "email.send");
        assert_eq!(key.value(), "user@example.com");
    }
}
