use std::sync::Arc;
use std::time::Duration;

use crate::tests::{MockEngine, MockTimeSupplier};
use crate::{LimitRule, RuleSet, ScriptEngine, SlidingWindowRateLimiter};

const START_MS: u64 = 1_700_000_000_000;

fn rule(window_seconds: u64, max_requests: u64) -> LimitRule {
    LimitRule::new(Duration::from_secs(window_seconds), max_requests).unwrap()
}

fn limiter(
    engine: &Arc<MockEngine>,
    time: &MockTimeSupplier,
    rules: Vec<LimitRule>,
) -> SlidingWindowRateLimiter {
    let engine: Arc<dyn ScriptEngine> = engine.clone();
    SlidingWindowRateLimiter::with_engine(
        engine,
        RuleSet::new(rules).unwrap(),
        Arc::new(time.clone()),
    )
}

#[test]
fn strict_allows_until_count_exceeds_limit() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 3)]);

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(l.over_limit_when_incremented("k", 1).await.unwrap());
            time.advance(Duration::from_secs(1));
        }

        assert_eq!(results, vec![false, false, false, true]);
    });
}

#[test]
fn non_strict_trips_at_exact_limit() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 3)]);

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(l.ge_limit_when_incremented("k", 1).await.unwrap());
            time.advance(Duration::from_secs(1));
        }

        // the third cumulative call reaches the limit exactly
        assert_eq!(results, vec![false, false, true]);
    });
}

#[test]
fn any_breached_rule_trips_the_set() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(1, 1), rule(60, 100)]);

        assert!(!l.over_limit_when_incremented("k", 1).await.unwrap());
        time.advance(Duration::from_millis(500));

        // the 1s rule is breached while the 60s rule is far from its limit
        assert!(l.over_limit_when_incremented("k", 1).await.unwrap());
    });
}

#[test]
fn rejected_requests_still_consume_quota() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 2)]);

        assert!(!l.ge_limit_when_incremented("k", 1).await.unwrap());
        assert!(l.ge_limit_when_incremented("k", 1).await.unwrap());

        // a zero-weight probe still sees the rejected request's weight
        assert!(l.ge_limit_when_incremented("k", 0).await.unwrap());
    });
}

#[test]
fn entries_expire_beyond_the_window() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 3)]);

        for _ in 0..3 {
            assert!(!l.over_limit_when_incremented("k", 1).await.unwrap());
        }
        assert!(l.over_limit_when_incremented("k", 1).await.unwrap());

        time.advance(Duration::from_secs(61));

        assert!(!l.over_limit_when_incremented("k", 1).await.unwrap());
    });
}

#[test]
fn weight_zero_probes_without_consuming() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 1)]);

        assert!(!l.over_limit_when_incremented("k", 0).await.unwrap());
        assert!(!l.over_limit_when_incremented("k", 1).await.unwrap());
        assert!(l.over_limit_when_incremented("k", 1).await.unwrap());

        // probes observe the breach but never advance the count
        assert!(l.over_limit_when_incremented("k", 0).await.unwrap());
        assert!(l.over_limit_when_incremented("k", 0).await.unwrap());

        time.advance(Duration::from_secs(61));
        assert!(!l.over_limit_when_incremented("k", 0).await.unwrap());
    });
}

#[test]
fn two_simultaneous_evaluations_yield_one_true_one_false() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = Arc::new(limiter(&engine, &time, vec![rule(60, 1)]));

        let first = {
            let l = Arc::clone(&l);
            async move { l.over_limit_when_incremented("k", 1).await.unwrap() }
        };
        let second = {
            let l = Arc::clone(&l);
            async move { l.over_limit_when_incremented("k", 1).await.unwrap() }
        };

        let (a, b) = tokio::join!(first, second);

        assert!(a ^ b, "expected exactly one over-limit outcome, got {a} and {b}");
    });
}

#[test]
fn keys_are_counted_independently() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 1)]);

        assert!(!l.over_limit_when_incremented("a", 1).await.unwrap());
        assert!(l.over_limit_when_incremented("a", 1).await.unwrap());

        assert!(!l.over_limit_when_incremented("b", 1).await.unwrap());
    });
}

#[test]
fn heavier_weights_consume_quota_faster() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let engine = Arc::new(MockEngine::new());
        let time = MockTimeSupplier::new(START_MS);
        let l = limiter(&engine, &time, vec![rule(60, 10)]);

        assert!(!l.over_limit_when_incremented("k", 4).await.unwrap());
        assert!(!l.over_limit_when_incremented("k", 6).await.unwrap());
        assert!(l.over_limit_when_incremented("k", 1).await.unwrap());
    });
}
