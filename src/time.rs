use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

/// Source of the current time for rate limit decisions.
///
/// The limiter never reads the system clock directly; it asks its supplier,
/// so tests can drive window expiry deterministically and deployments can
/// substitute a shared remote clock. The method is async because a supplier
/// may need a network round trip.
#[async_trait]
pub trait TimeSupplier: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    async fn now_millis(&self) -> u64;
}

/// [`TimeSupplier`] backed by the local system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSupplier;

#[async_trait]
impl TimeSupplier for SystemTimeSupplier {
    async fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before the Unix epoch")
            .as_millis() as u64
    }
}
