use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

/// Opaque digest of a script registered with the remote engine.
///
/// Cheap to clone; owned by the limiter's script cache. Holders request
/// invalidation through the cache rather than mutating anything in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptSha(Arc<str>);

impl ScriptSha {
    pub(crate) fn new(sha: String) -> Self {
        Self(Arc::from(sha))
    }

    /// The digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Failures surfaced by a [`ScriptEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine no longer recognises the digest, typically after a server
    /// restart or a script flush. Recoverable by re-registering the source.
    #[error("script digest not recognised by the engine")]
    UnknownDigest,

    /// Transport or server failure.
    #[error("redis error: {0}")]
    Connection(#[from] redis::RedisError),
}

/// Remote engine that registers scripts once and executes them atomically by
/// digest.
///
/// Each `invoke` for a given key runs atomically with respect to all other
/// concurrent invocations on that key; implementations must not let a read
/// and a write interleave. Registering an already-known source is idempotent.
///
/// [`RedisScriptEngine`] is the production implementation; tests substitute
/// an in-memory double.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Register `source` with the engine, returning its digest.
    async fn register(&self, source: &str) -> Result<ScriptSha, EngineError>;

    /// Execute the script registered under `sha` and return the single token
    /// it produces.
    ///
    /// Fails with [`EngineError::UnknownDigest`] when the engine has
    /// forgotten the digest.
    async fn invoke(
        &self,
        sha: &ScriptSha,
        keys: &[&str],
        args: &[String],
    ) -> Result<String, EngineError>;

    /// Remove all state stored under `key`, returning how many entries were
    /// removed.
    async fn delete(&self, key: &str) -> Result<u64, EngineError>;
}

/// [`ScriptEngine`] backed by a Redis server.
///
/// Uses `SCRIPT LOAD` / `EVALSHA` / `DEL` over a
/// [`ConnectionManager`](redis::aio::ConnectionManager). The `NOSCRIPT`
/// condition is detected through the structured
/// [`redis::ErrorKind::NoScriptError`] kind, not by inspecting error text.
#[derive(Clone)]
pub struct RedisScriptEngine {
    connection_manager: ConnectionManager,
}

impl RedisScriptEngine {
    /// Wrap an established connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl ScriptEngine for RedisScriptEngine {
    async fn register(&self, source: &str) -> Result<ScriptSha, EngineError> {
        let mut connection_manager = self.connection_manager.clone();

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut connection_manager)
            .await?;

        Ok(ScriptSha::new(sha))
    }

    async fn invoke(
        &self,
        sha: &ScriptSha,
        keys: &[&str],
        args: &[String],
    ) -> Result<String, EngineError> {
        let mut connection_manager = self.connection_manager.clone();

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha.as_str()).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg);
        }

        let token: String = cmd
            .query_async(&mut connection_manager)
            .await
            .map_err(|e| {
                if e.kind() == redis::ErrorKind::NoScriptError {
                    EngineError::UnknownDigest
                } else {
                    EngineError::Connection(e)
                }
            })?;

        Ok(token)
    }

    async fn delete(&self, key: &str) -> Result<u64, EngineError> {
        let mut connection_manager = self.connection_manager.clone();

        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;

        Ok(removed)
    }
}
