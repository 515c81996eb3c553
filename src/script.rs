use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use crate::{EngineError, ScriptEngine, ScriptSha, WindlassError};

/// Atomic sliding-window evaluation, executed server-side.
///
/// Per key, one sorted set holds an append-and-expire log: member
/// `weight:entry_id`, score = timestamp ms. For each rule the weighted count
/// over the trailing window (including the weight being added) is compared
/// against the rule's limit; the weight lands in the log whether or not a
/// rule is breached. Entries older than the largest window are pruned in the
/// same step, and the key expires with it.
pub(crate) const SLIDING_WINDOW_SOURCE: &str = r#"
    local key = KEYS[1]

    local rules = cjson.decode(ARGV[1])
    local now_ms = tonumber(ARGV[2])
    local weight = tonumber(ARGV[3])
    local strictly_greater = tonumber(ARGV[4]) == 1
    local entry_id = ARGV[5]

    local longest_ms = 0
    for i = 1, #rules do
        local window_ms = rules[i][1] * 1000
        if window_ms > longest_ms then
            longest_ms = window_ms
        end
    end

    -- entries at or beyond the largest window can never count again
    redis.call("ZREMRANGEBYSCORE", key, "-inf", now_ms - longest_ms)

    local over_limit = false
    for i = 1, #rules do
        local window_ms = rules[i][1] * 1000
        local max_requests = rules[i][2]

        local count = weight
        local entries = redis.call("ZRANGEBYSCORE", key, "(" .. (now_ms - window_ms), "+inf")
        for j = 1, #entries do
            local sep = string.find(entries[j], ":", 1, true)
            count = count + (tonumber(string.sub(entries[j], 1, sep - 1)) or 0)
        end

        if strictly_greater then
            if count > max_requests then
                over_limit = true
            end
        elseif count >= max_requests then
            over_limit = true
        end
    end

    -- the weight counts against the window even when a rule is breached
    if weight > 0 then
        redis.call("ZADD", key, now_ms, tostring(weight) .. ":" .. entry_id)
        redis.call("PEXPIRE", key, longest_ms)
    end

    if over_limit then
        return "1"
    end

    return "0"
"#;

type LoadFuture = Shared<BoxFuture<'static, Result<ScriptSha, Arc<EngineError>>>>;

enum Slot {
    Empty,
    Loading(LoadFuture),
    Ready(ScriptSha),
}

/// Keeps the sliding-window script resident on the engine and hands out its
/// current digest.
///
/// The digest is registered lazily on first use and cached; concurrent
/// callers before that first registration completes share one in-flight
/// load rather than racing parallel registrations. This cache is the sole
/// writer of the cached digest.
pub(crate) struct ScriptCache {
    engine: Arc<dyn ScriptEngine>,
    source: &'static str,
    slot: Mutex<Slot>,
}

impl ScriptCache {
    pub(crate) fn new(engine: Arc<dyn ScriptEngine>, source: &'static str) -> Self {
        Self {
            engine,
            source,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Digest of the script, registering it with the engine on first use.
    ///
    /// A registration failure is shared by every waiter of that load and
    /// leaves the cache empty, so the next call retries from scratch.
    pub(crate) async fn stored(&self) -> Result<ScriptSha, WindlassError> {
        let load = {
            let mut slot = self.slot.lock().expect("script cache lock poisoned");
            match &*slot {
                Slot::Ready(sha) => return Ok(sha.clone()),
                Slot::Loading(load) => load.clone(),
                Slot::Empty => {
                    let engine = Arc::clone(&self.engine);
                    let source = self.source;
                    let load = async move { engine.register(source).await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Slot::Loading(load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        let mut slot = self.slot.lock().expect("script cache lock poisoned");
        match result {
            Ok(sha) => {
                if matches!(&*slot, Slot::Loading(current) if current.ptr_eq(&load)) {
                    debug!(sha = sha.as_str(), "registered sliding-window script");
                    *slot = Slot::Ready(sha.clone());
                }
                Ok(sha)
            }
            Err(err) => {
                if matches!(&*slot, Slot::Loading(current) if current.ptr_eq(&load)) {
                    *slot = Slot::Empty;
                }
                Err(WindlassError::Registration(err))
            }
        }
    }

    /// Forget `sha` so the next [`stored`](Self::stored) call registers
    /// afresh.
    ///
    /// A digest other than the cached one is ignored: another caller already
    /// reloaded, and an in-flight load is never torn down.
    pub(crate) fn invalidate(&self, sha: &ScriptSha) {
        let mut slot = self.slot.lock().expect("script cache lock poisoned");
        if matches!(&*slot, Slot::Ready(current) if current == sha) {
            *slot = Slot::Empty;
        }
    }
}
