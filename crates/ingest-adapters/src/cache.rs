//! Cache Adapter (C4): key/value capability with a supervised reconnect
//! loop, on top of the `redis` crate's async multiplexed connection.
//!
//! Grounded on `original_source/redis_client.py`'s `connection_check_loop`
//! (periodic ping, reconnect on failure) and `ensure_connection` (retry
//! policy shared with the relational adapter); operations when disconnected
//! log-and-drop rather than propagate an error (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::registry::CacheClient;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct RedisCache {
    client_id: String,
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCache {
    pub fn new(client_id: impl Into<String>, host: &str, port: u16, db: u32, password: Option<&str>) -> Result<Self, redis::RedisError> {
        let auth = password.map(|p| format!(":{p}@")).unwrap_or_default();
        let url = format!("redis://{auth}{host}:{port}/{db}");
        let client = redis::Client::open(url)?;
        Ok(Self { client_id: client_id.into(), client, connection: RwLock::new(None) })
    }

    async fn ensure_connection(&self) {
        if self.connection.read().await.is_some() {
            return;
        }
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                log::info!("cache client '{}' connected", self.client_id);
                *self.connection.write().await = Some(conn);
            }
            Err(err) => {
                log::error!("cache client '{}' failed to connect: {}", self.client_id, err);
            }
        }
    }

    /// Every `check_interval`, pings the connection and reconnects on
    /// failure. Runs until `shutdown` fires.
    pub async fn run_supervised(self: Arc<Self>, check_interval: Duration, shutdown: CancellationToken) {
        self.ensure_connection().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(check_interval) => {}
            }
            let alive = {
                let mut guard = self.connection.write().await;
                match guard.as_mut() {
                    Some(conn) => redis::cmd("PING").query_async::<_, String>(conn).await.is_ok(),
                    None => false,
                }
            };
            if !alive {
                log::warn!("cache client '{}': connection lost, reconnecting", self.client_id);
                *self.connection.write().await = None;
                self.ensure_connection().await;
            }
        }
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = self.connection.write().await;
        let conn = guard.as_mut()?;
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => value,
            Err(err) => {
                log::error!("cache client '{}' get('{}') failed: {}", self.client_id, key, err);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) {
        let mut guard = self.connection.write().await;
        let Some(conn) = guard.as_mut() else {
            log::error!("cache client '{}': cannot set('{}'), not connected", self.client_id, key);
            return;
        };
        if let Err(err) = conn.set::<_, _, ()>(key, value).await {
            log::error!("cache client '{}' set('{}') failed: {}", self.client_id, key, err);
        }
    }

    async fn delete(&self, key: &str) {
        let mut guard = self.connection.write().await;
        let Some(conn) = guard.as_mut() else {
            log::error!("cache client '{}': cannot delete('{}'), not connected", self.client_id, key);
            return;
        };
        if let Err(err) = conn.del::<_, ()>(key).await {
            log::error!("cache client '{}' delete('{}') failed: {}", self.client_id, key, err);
        }
    }

    async fn close(&self) {
        *self.connection.write().await = None;
        log::info!("cache client '{}' connection dropped", self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_a_fresh_client_returns_none_without_connecting() {
        let cache = RedisCache::new("cache1", "localhost", 6379, 0, None).unwrap();
        assert!(cache.connection.try_read().unwrap().is_none());
    }

    #[test]
    fn new_accepts_a_password() {
        let cache = RedisCache::new("cache1", "localhost", 6379, 0, Some("secret"));
        assert!(cache.is_ok());
    }
}
