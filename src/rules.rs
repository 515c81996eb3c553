use std::time::Duration;

use crate::WindlassError;

/// A single sliding-window quota: at most `max_requests` weighted requests
/// within any trailing `window`.
///
/// A request is over-limit under this rule when the weighted count within the
/// trailing window exceeds (strict) or meets/exceeds (non-strict)
/// `max_requests`; see
/// [`SlidingWindowRateLimiter`](crate::SlidingWindowRateLimiter) for how the
/// two comparison modes are exposed.
///
/// # Validation
///
/// - `window` must be at least one whole second (sub-second remainders are
///   rejected rather than silently truncated)
/// - `max_requests` must be greater than 0
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use windlass::LimitRule;
///
/// // at most 100 requests in any trailing minute
/// let rule = LimitRule::new(Duration::from_secs(60), 100).unwrap();
/// assert_eq!(rule.window_seconds(), 60);
/// assert_eq!(rule.max_requests(), 100);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LimitRule {
    window_seconds: u64,
    max_requests: u64,
}

impl LimitRule {
    /// Create a new rule, validating window and limit.
    pub fn new(window: Duration, max_requests: u64) -> Result<Self, WindlassError> {
        if window.subsec_nanos() != 0 {
            return Err(WindlassError::InvalidRule(
                "window must be a whole number of seconds".to_string(),
            ));
        }

        let window_seconds = window.as_secs();

        if window_seconds == 0 {
            return Err(WindlassError::InvalidRule(
                "window must be at least 1 second".to_string(),
            ));
        }

        if max_requests == 0 {
            return Err(WindlassError::InvalidRule(
                "max requests must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            window_seconds,
            max_requests,
        })
    }

    /// Window duration in whole seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Maximum weighted count allowed within the window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

/// A non-empty, ordered set of [`LimitRule`]s evaluated together against the
/// same key.
///
/// A key is over-limit as soon as ANY rule in the set reports over-limit. The
/// set is fixed for the lifetime of a limiter instance; its wire encoding is
/// computed once here so every evaluation reuses the same string.
#[derive(Clone, Debug)]
pub struct RuleSet {
    rules: Vec<LimitRule>,
    wire: String,
}

impl RuleSet {
    /// Create a rule set from one or more rules.
    pub fn new(rules: Vec<LimitRule>) -> Result<Self, WindlassError> {
        if rules.is_empty() {
            return Err(WindlassError::InvalidRuleSet(
                "rule set must contain at least one rule".to_string(),
            ));
        }

        let pairs: Vec<(u64, u64)> = rules
            .iter()
            .map(|rule| (rule.window_seconds, rule.max_requests))
            .collect();
        let wire = serde_json::to_string(&pairs)
            .map_err(|e| WindlassError::InvalidRuleSet(e.to_string()))?;

        Ok(Self { rules, wire })
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[LimitRule] {
        &self.rules
    }

    /// Encoded form consumed by the sliding-window script:
    /// a JSON array of `[window_seconds, max_requests]` pairs.
    ///
    /// Stable only between this crate and its paired script; not a public
    /// wire format.
    pub(crate) fn wire(&self) -> &str {
        &self.wire
    }
}

impl From<LimitRule> for RuleSet {
    fn from(rule: LimitRule) -> Self {
        // a rule that passed its own validation always forms a valid set
        let Ok(set) = Self::new(vec![rule]) else {
            unreachable!("RuleSet::from: single-rule set construction cannot fail");
        };

        set
    }
}
