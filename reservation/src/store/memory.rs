use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;
use tracing::trace;

use super::Store;
use crate::error::{StoreError, StoreOp};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store with per-key expiry.
///
/// Deadlines are measured on the tokio clock, so a paused test runtime drives
/// expiry deterministically. Clones share the same keyspace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        match self.entries.lock() {
            Ok(entries) => entries.values().filter(|e| e.is_live(now)).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock the keyspace, dropping the entry for `key` if it has expired.
    fn lock_purged(
        &self,
        op: StoreOp,
        key: &str,
    ) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::new(op, "memory store lock poisoned"))?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            trace!(key, "expired");
            entries.remove(key);
        }
        Ok(entries)
    }
}

impl Store for MemoryStore {
    async fn try_set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.lock_purged(StoreOp::SetIfAbsent, key)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.lock_purged(StoreOp::Get, key)?;
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.lock_purged(StoreOp::Delete, key)?;
        Ok(entries.remove(key).is_some())
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.lock_purged(StoreOp::RefreshExpiry, key)?;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
