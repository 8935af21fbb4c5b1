use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use filepress_core::FilepressError;

use crate::FastStore;

/// Redis-backed fast store. `ConnectionManager` reconnects on its own and is
/// cheap to clone per operation.
pub struct RedisStore {
    manager: ConnectionManager,
}

fn store_err(e: redis::RedisError) -> FilepressError {
    FilepressError::FastStore(e.to_string())
}

impl RedisStore {
    /// Connect from a `redis://` URL.
    pub async fn connect(url: &str) -> Result<Self, FilepressError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let manager = client.get_connection_manager().await.map_err(store_err)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl FastStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, FilepressError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FilepressError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl_secs).await.map_err(store_err)
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError> {
        let mut conn = self.manager.clone();
        conn.decr(key, amount).await.map_err(store_err)
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64, FilepressError> {
        let mut conn = self.manager.clone();
        conn.incr(key, amount).await.map_err(store_err)
    }

    async fn exists(&self, key: &str) -> Result<bool, FilepressError> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(store_err)
    }
}
