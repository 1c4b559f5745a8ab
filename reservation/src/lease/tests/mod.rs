//! Tests for leases

use std::time::Duration;

use tokio::time::sleep;

use crate::{
    error::StoreError,
    lease::{Lease, LeaseConfig},
    signal::SignalDispatch,
    store::{MemoryStore, Store},
};

mod scoped;

/// Short timings so renewal is observable on a paused clock.
fn test_config() -> LeaseConfig {
    LeaseConfig {
        ttl: Duration::from_secs(2),
        heartbeat: Duration::from_millis(500),
        poll_interval: Duration::from_secs(1),
        ..LeaseConfig::default()
    }
}

fn new_lease<S: Store>(store: S, owner: &str, dispatch: &SignalDispatch) -> Lease<S> {
    crate::tests::init_logging();
    Lease::with_dispatch(store, "test_system", owner, test_config(), dispatch).expect("lease")
}

/// Applies a set-if-absent at once but answers it only after `delay`, so a
/// caller can give up while the write has already landed.
#[derive(Clone)]
struct SlowReplyStore {
    inner: MemoryStore,
    delay: Duration,
}

impl Store for SlowReplyStore {
    async fn try_set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let res = self.inner.try_set_with_expiry(key, value, ttl).await;
        sleep(self.delay).await;
        res
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.refresh_expiry(key, ttl).await
    }
}
