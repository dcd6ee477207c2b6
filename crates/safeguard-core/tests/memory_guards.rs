//! Guard-level properties over the in-memory implementations: token
//! accounting bounds, refill liveness, record round-trips, and metrics
//! wiring.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use safeguard_core::{
    CounterMetrics, IdempotencyManager, IdempotencyPolicy, IdempotencyRecord, JsonPayloadCodec,
    MemoryIdempotencyManager, MemoryRateLimiter, PayloadCodec, RateLimitPolicy, RateLimiter,
    Safeguard, SafeguardError,
    testutil::make_key,
};

#[tokio::test]
async fn refill_liveness_after_one_period() {
    let limiter = MemoryRateLimiter::new();
    let key = make_key("liveness", 0);
    let policy = RateLimitPolicy::new(3, 2, Duration::from_millis(50));

    // Drain the bucket.
    for _ in 0..3 {
        assert!(limiter.try_consume(&key, &policy).await.unwrap().allowed);
    }
    assert!(!limiter.try_consume(&key, &policy).await.unwrap().allowed);

    // One whole period later at least `refill_tokens` are available.
    tokio::time::sleep(Duration::from_millis(70)).await;
    let refilled = limiter
        .try_consume(&key, &policy.clone().with_requested(2))
        .await
        .unwrap();
    assert!(refilled.allowed, "a fresh caller gets the refilled tokens");
}

#[tokio::test]
async fn denied_retry_after_is_honest() {
    let limiter = MemoryRateLimiter::new();
    let key = make_key("hint", 0);
    let policy = RateLimitPolicy::new(1, 1, Duration::from_millis(60));

    assert!(limiter.try_consume(&key, &policy).await.unwrap().allowed);
    let denied = limiter.try_consume(&key, &policy).await.unwrap();
    let hint = denied.retry_after.unwrap();
    assert!(hint <= Duration::from_millis(60));

    tokio::time::sleep(hint + Duration::from_millis(20)).await;
    assert!(limiter.try_consume(&key, &policy).await.unwrap().allowed);
}

#[tokio::test]
async fn record_round_trips_through_save_and_get() {
    let manager = MemoryIdempotencyManager::new();
    let codec = JsonPayloadCodec;
    let key = make_key("round-trip", 0);
    let policy = IdempotencyPolicy::new(Duration::from_secs(60));

    let original = serde_json::json!({"orderId": "abc"});
    let payload = codec.serialize(&original).unwrap();
    let record = IdempotencyRecord::success(Some("order".into()), payload);
    manager.save_success(&key, record, &policy).await.unwrap();

    let stored = manager.get(&key).await.unwrap().expect("record present");
    let bytes: &Bytes = stored.payload.as_ref().expect("payload cached");
    let decoded = codec.deserialize(bytes, stored.payload_type.as_deref()).unwrap();
    assert_eq!(decoded, original);
}

#[tokio::test]
async fn facade_decisions_reach_the_metrics_sink() {
    let metrics = Arc::new(CounterMetrics::new());
    let safeguard = Safeguard::in_memory().with_metrics(metrics.clone());
    let key = make_key("metrics", 0);
    let policy = RateLimitPolicy::new(1, 1, Duration::from_secs(3600));

    let _: Result<(), SafeguardError> =
        safeguard.with_rate_limit(&key, &policy, || async { Ok(()) }).await;
    let _: Result<(), SafeguardError> =
        safeguard.with_rate_limit(&key, &policy, || async { Ok(()) }).await;

    let idem_policy = IdempotencyPolicy::new(Duration::from_secs(60));
    let _: Result<u32, SafeguardError> =
        safeguard.with_idempotency(&key, &idem_policy, || async { Ok(1) }).await;
    let _: Result<u32, SafeguardError> =
        safeguard.with_idempotency(&key, &idem_policy, || async { Ok(2) }).await;

    let snap = metrics.snapshot();
    assert_eq!(snap.rate_limit_blocked, 1);
    assert_eq!(snap.idem_miss, 1);
    assert_eq!(snap.idem_hit, 1);
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// However the bucket is hammered, the reported remaining tokens
        /// never exceed the configured capacity.
        #[test]
        fn remaining_tokens_never_exceed_capacity(
            capacity in 1u64..20,
            refill in 1u64..5,
            calls in proptest::collection::vec(1u64..4, 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async {
                let limiter = MemoryRateLimiter::new();
                let key = make_key("prop", 0);
                let base = RateLimitPolicy::new(capacity, refill, Duration::from_millis(5));

                for requested in calls {
                    let policy = base.clone().with_requested(requested.min(capacity));
                    let result = limiter.try_consume(&key, &policy).await.unwrap();
                    prop_assert!(
                        result.remaining <= capacity,
                        "remaining {} exceeds capacity {}",
                        result.remaining,
                        capacity
                    );
                }
                Ok(())
            })?;
        }

        /// A denied attempt leaves the bucket unchanged: a follow-up request
        /// for the remaining token count still succeeds.
        #[test]
        fn denial_does_not_spend_tokens(
            capacity in 2u64..10,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async {
                let limiter = MemoryRateLimiter::new();
                let key = make_key("prop-deny", 0);
                let base = RateLimitPolicy::new(capacity, 1, Duration::from_secs(3600));

                // Leave exactly one token.
                let drain = base.clone().with_requested(capacity - 1);
                prop_assert!(limiter.try_consume(&key, &drain).await.unwrap().allowed);

                // Requesting two is denied and must not spend the last one.
                let two = base.clone().with_requested(2.min(capacity));
                let denied = limiter.try_consume(&key, &two).await.unwrap();
                prop_assert!(!denied.allowed);
                prop_assert_eq!(denied.remaining, 1);

                let one = base.clone().with_requested(1);
                prop_assert!(limiter.try_consume(&key, &one).await.unwrap().allowed);
                Ok(())
            })?;
        }
    }
}
