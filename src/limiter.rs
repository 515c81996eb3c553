use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::debug;

use crate::script::{SLIDING_WINDOW_SOURCE, ScriptCache};
use crate::{
    EngineError, RedisScriptEngine, RuleSet, ScriptEngine, SystemTimeSupplier, TimeSupplier,
    WindlassError,
};

/// Ceiling a blocking call waits for a decision before giving up.
const DECISION_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a count exactly at the limit already counts as over it.
///
/// Threaded through the pipeline instead of a bare boolean so call sites
/// stay unambiguous; the facade methods pick the mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ComparisonMode {
    /// Over-limit only when the count strictly exceeds the limit.
    StrictlyGreater,
    /// Over-limit as soon as the count reaches the limit.
    GreaterOrEqual,
}

impl ComparisonMode {
    fn wire_flag(self) -> &'static str {
        match self {
            ComparisonMode::StrictlyGreater => "1",
            ComparisonMode::GreaterOrEqual => "0",
        }
    }
}

/// Sliding-window rate limiter coordinated through a shared Redis store.
///
/// Every evaluation is a single atomic script invocation: the weighted count
/// for the key is read, compared against each rule, and incremented in one
/// step, so concurrent processes sharing the store agree on one count per
/// key. The script itself is registered once and invoked by digest; when the
/// engine forgets the digest (restart, script flush) the next evaluation
/// reloads it and retries once, invisible to the caller.
///
/// The rule set is fixed for the lifetime of the limiter. Construction is
/// cheap apart from the rule encoding; the first evaluation pays the
/// one-time script registration round trip.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use windlass::{LimitRule, RuleSet, SlidingWindowRateLimiter};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
///
/// let rules = RuleSet::new(vec![LimitRule::new(Duration::from_secs(60), 100)?])?;
/// let limiter = SlidingWindowRateLimiter::new(connection_manager, rules);
///
/// if limiter.over_limit_when_incremented("user_123", 1).await? {
///     // reject
/// }
/// # Ok(())
/// # }
/// ```
pub struct SlidingWindowRateLimiter {
    engine: Arc<dyn ScriptEngine>,
    script_cache: ScriptCache,
    rules: RuleSet,
    time_supplier: Arc<dyn TimeSupplier>,
    instance_tag: u64,
    entry_seq: AtomicU64,
    decision_timeout: Duration,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter over a Redis connection, using the system clock.
    pub fn new(connection_manager: ConnectionManager, rules: RuleSet) -> Self {
        Self::with_engine(
            Arc::new(RedisScriptEngine::new(connection_manager)),
            rules,
            Arc::new(SystemTimeSupplier),
        )
    }

    /// Create a limiter over an arbitrary engine and time supplier.
    ///
    /// This is the seam for injecting test doubles or a shared remote clock.
    pub fn with_engine(
        engine: Arc<dyn ScriptEngine>,
        rules: RuleSet,
        time_supplier: Arc<dyn TimeSupplier>,
    ) -> Self {
        Self {
            script_cache: ScriptCache::new(Arc::clone(&engine), SLIDING_WINDOW_SOURCE),
            engine,
            rules,
            time_supplier,
            instance_tag: rand::random(),
            entry_seq: AtomicU64::new(0),
            decision_timeout: DECISION_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    /// The rule set this limiter enforces.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Increment `key` by `weight` and report whether any rule's count is now
    /// strictly greater than its limit.
    ///
    /// The weight is consumed whether or not the call reports over-limit.
    /// Pass a weight of 1 for plain requests, more for expensive ones, or 0
    /// to probe without consuming quota.
    pub async fn over_limit_when_incremented(
        &self,
        key: &str,
        weight: u64,
    ) -> Result<bool, WindlassError> {
        self.eq_or_ge_limit(key, weight, ComparisonMode::StrictlyGreater)
            .await
    }

    /// Increment `key` by `weight` and report whether any rule's count now
    /// meets or exceeds its limit.
    ///
    /// Same pipeline as
    /// [`over_limit_when_incremented`](Self::over_limit_when_incremented),
    /// with the count compared non-strictly.
    pub async fn ge_limit_when_incremented(
        &self,
        key: &str,
        weight: u64,
    ) -> Result<bool, WindlassError> {
        self.eq_or_ge_limit(key, weight, ComparisonMode::GreaterOrEqual)
            .await
    }

    /// Unconditionally clear all counters for `key`.
    ///
    /// Returns whether any state existed. A subsequent evaluation behaves as
    /// if the key had never been seen.
    pub async fn reset_limit(&self, key: &str) -> Result<bool, WindlassError> {
        validate_key(key)?;

        let removed = self.engine.delete(key).await?;
        Ok(removed > 0)
    }

    /// Blocking form of
    /// [`over_limit_when_incremented`](Self::over_limit_when_incremented).
    ///
    /// Waits on the same pipeline for up to 5 seconds and fails that call
    /// with [`WindlassError::DecisionTimeout`] once the ceiling is exceeded;
    /// the atomic step already sent to the store is not retracted. Call from
    /// a plain thread or a multi-thread runtime worker, not from a
    /// current-thread runtime.
    pub fn blocking_over_limit_when_incremented(
        &self,
        key: &str,
        weight: u64,
    ) -> Result<bool, WindlassError> {
        self.wait_for_decision(self.over_limit_when_incremented(key, weight))
    }

    /// Blocking form of
    /// [`ge_limit_when_incremented`](Self::ge_limit_when_incremented).
    pub fn blocking_ge_limit_when_incremented(
        &self,
        key: &str,
        weight: u64,
    ) -> Result<bool, WindlassError> {
        self.wait_for_decision(self.ge_limit_when_incremented(key, weight))
    }

    /// Blocking form of [`reset_limit`](Self::reset_limit).
    pub fn blocking_reset_limit(&self, key: &str) -> Result<bool, WindlassError> {
        self.wait_for_decision(self.reset_limit(key))
    }

    /// One evaluation: validate, fetch time and digest, invoke the script,
    /// interpret its token. Retries the whole sequence exactly once when the
    /// engine no longer recognises the digest.
    async fn eq_or_ge_limit(
        &self,
        key: &str,
        weight: u64,
        mode: ComparisonMode,
    ) -> Result<bool, WindlassError> {
        validate_key(key)?;

        let mut reloaded = false;
        loop {
            let now_ms = self.time_supplier.now_millis().await;
            let sha = self.script_cache.stored().await?;
            let args = [
                self.rules.wire().to_string(),
                now_ms.to_string(),
                weight.to_string(),
                mode.wire_flag().to_string(),
                self.next_entry_id(),
            ];

            match self.engine.invoke(&sha, &[key], &args).await {
                Ok(token) => {
                    let over = token == "1";
                    if over {
                        debug!(key, weight, ?mode, "weighted count for key is over the limit");
                    }
                    return Ok(over);
                }
                Err(EngineError::UnknownDigest) if !reloaded => {
                    debug!(
                        sha = sha.as_str(),
                        "engine no longer recognises the script digest, reloading"
                    );
                    self.script_cache.invalidate(&sha);
                    reloaded = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Wait adapter for the blocking API. No evaluation logic of its own:
    /// it drives the async pipeline to completion under a deadline.
    fn wait_for_decision<T, F>(&self, decision: F) -> Result<T, WindlassError>
    where
        F: Future<Output = Result<T, WindlassError>>,
    {
        let ceiling = self.decision_timeout;
        let bounded = async move {
            tokio::time::timeout(ceiling, decision)
                .await
                .map_err(|_| WindlassError::DecisionTimeout(ceiling))?
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(bounded))
        } else {
            tokio::runtime::Runtime::new()
                .expect("failed to create tokio runtime")
                .block_on(bounded)
        }
    }

    /// Unique log-entry id so same-millisecond requests never collide in the
    /// store: a random per-instance tag plus a monotonic sequence.
    fn next_entry_id(&self) -> String {
        let seq = self.entry_seq.fetch_add(1, Ordering::Relaxed);
        format!("{:x}-{:x}", self.instance_tag, seq)
    }
}

fn validate_key(key: &str) -> Result<(), WindlassError> {
    if key.is_empty() {
        return Err(WindlassError::InvalidKey(
            "key must not be empty".to_string(),
        ));
    }

    Ok(())
}
