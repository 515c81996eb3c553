use std::{sync::Arc, time::Duration};

use crate::EngineError;

/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum WindlassError {
    /// The evaluation key failed validation.
    #[error("invalid rate limit key: {0}")]
    InvalidKey(String),

    /// A limit rule failed validation.
    #[error("invalid limit rule: {0}")]
    InvalidRule(String),

    /// A rule set failed validation.
    #[error("invalid rule set: {0}")]
    InvalidRuleSet(String),

    /// Registering the sliding-window script with the engine failed.
    ///
    /// Every caller waiting on the same coalesced registration receives the
    /// same shared error. The cache itself is not poisoned; the next call
    /// starts a fresh registration.
    #[error("script registration failed: {0}")]
    Registration(Arc<EngineError>),

    /// The remote engine reported a failure during an evaluation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A blocking call did not produce a decision within the ceiling.
    #[error("no rate limit decision within {0:?}")]
    DecisionTimeout(Duration),
}
