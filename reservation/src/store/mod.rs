use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;

use crate::error::StoreError;

/// Capability interface over a shared key-value store.
///
/// Each operation must be a single atomic round-trip at the store level.
/// Implementations report transport failures as [`StoreError`] and never
/// retry; retry policy belongs to the caller.
pub trait Store: Clone + Send + Sync + 'static {
    /// Set `key` to `value` only if `key` is absent, expiring after `ttl`.
    ///
    /// Returns `true` iff this call performed the set.
    fn try_set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Current value of `key`, if present.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Remove `key`. Returns `true` iff a key was actually removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Reset the remaining time-to-live of `key` to `ttl` without changing its
    /// value. Returns `false` if the key had already expired or been deleted.
    fn refresh_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

mod memory;
mod redis;

pub use self::redis::RedisStore;
pub use memory::MemoryStore;

/// Backoff used when establishing a store connection.
pub fn retry_backoff() -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff::default();
    backoff.max_elapsed_time = Some(Duration::from_secs(15));
    backoff
}
