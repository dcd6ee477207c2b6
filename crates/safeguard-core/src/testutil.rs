//! Shared test utilities for guard testing.
//!
//! Feature-gated behind `testutil` to prevent leaking into production
//! builds. Enable it in `[dev-dependencies]` for integration tests:
//!
//! ```toml
//! [dev-dependencies]
//! safeguard-core = { path = "../safeguard-core", features = ["testutil"] }
//! ```

use crate::key::Key;

/// Creates a deterministic test key within a namespace.
///
/// Produces values like `"k-000042"` (zero-padded to 6 digits) so keys
/// sort the same lexicographically and numerically.
#[must_use]
pub fn make_key(namespace: &str, idx: usize) -> Key {
    Key::new(namespace, format!("k-{idx:06}"))
}

/// Asserts that a result is the given [`SafeguardError`](crate::SafeguardError)
/// variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use safeguard_core::{assert_safeguard_error, Key, SafeguardError, SafeguardResult};
///
/// let result: SafeguardResult<()> =
///     Err(SafeguardError::idempotency_conflict(Key::new("ns", "v")));
/// assert_safeguard_error!(result, IdempotencyConflict);
/// ```
#[macro_export]
macro_rules! assert_safeguard_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::SafeguardError::$variant { .. })),
            "expected SafeguardError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::SafeguardError::$variant { .. })),
            "{}: expected SafeguardError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SafeguardResult;

    #[test]
    fn make_key_is_deterministic() {
        assert_eq!(make_key("ns", 42), make_key("ns", 42));
        assert_eq!(make_key("ns", 42).value(), "k-000042");
    }

    #[test]
    fn matcher_accepts_expected_variant() {
        let result: SafeguardResult<()> =
            Err(crate::SafeguardError::idempotency_conflict(Key::new("ns", "v")));
        assert_safeguard_error!(result, IdempotencyConflict);
    }
}
