use std::time::Duration;

use redis::{aio::ConnectionManager, Client};
use tracing::{debug, warn};

use super::{retry_backoff, Store};
use crate::error::{StoreError, StoreOp};

/// [`Store`] backed by Redis.
///
/// Uses `SET NX PX`, `GET`, `DEL` and `PEXPIRE` over a multiplexed
/// connection manager, which reconnects on its own between calls.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a connection manager for `url`, e.g. `redis://127.0.0.1/`.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect(url: &str) -> Result<RedisStore, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::new(StoreOp::Connect, e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::new(StoreOp::Connect, e))?;
        debug!("connected");
        Ok(RedisStore { conn })
    }

    /// Like [`RedisStore::connect`], retrying with exponential backoff for up
    /// to 15 seconds. Only connection establishment is retried.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect_with_backoff(url: &str) -> Result<RedisStore, StoreError> {
        backoff::future::retry_notify(
            retry_backoff(),
            || async { RedisStore::connect(url).await.map_err(backoff::Error::transient) },
            |err, delay| warn!(?err, ?delay, "retrying connection"),
        )
        .await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl Store for RedisStore {
    async fn try_set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(StoreOp::SetIfAbsent, e))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(StoreOp::Get, e))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(StoreOp::Delete, e))?;
        Ok(removed > 0)
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(StoreOp::RefreshExpiry, e))?;
        Ok(refreshed == 1)
    }
}
