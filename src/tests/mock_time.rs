use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::TimeSupplier;

/// Controllable time supplier; clones share the same underlying value.
#[derive(Clone)]
pub(crate) struct MockTimeSupplier {
    now_ms: Arc<AtomicU64>,
}

impl MockTimeSupplier {
    pub(crate) fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeSupplier for MockTimeSupplier {
    async fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
