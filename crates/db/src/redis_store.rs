use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;

use crate::kv::{KeyValueStore, StoreError};

/// Redis-backed store; TTLs map onto native `EXPIRE`.
pub struct RedisKeyValueStore {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKeyValueStore").finish_non_exhaustive()
    }
}

impl RedisKeyValueStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn backend(error: redis::RedisError) -> StoreError {
    StoreError::Backend(error.to_string())
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock().await;
        conn.get(key).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        redis::pipe()
            .set_ex(key, value, ttl_secs(ttl))
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let removed: i64 = conn.del(key).await.map_err(backend)?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let seconds = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let mut conn = self.conn.lock().await;
        conn.expire(key, seconds).await.map_err(backend)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.sadd(key, member).await.map_err(backend)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock().await;
        let mut members: Vec<String> = conn.smembers(key).await.map_err(backend)?;
        members.sort();
        Ok(members)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let _: i64 = conn.srem(key, member).await.map_err(backend)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        redis::cmd("PING").query_async::<String>(&mut *conn).await.map(|_| ()).map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ttl_secs, RedisKeyValueStore};
    use crate::kv::StoreError;

    #[test]
    fn sub_second_ttls_round_up_to_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(30 * 24 * 3600)), 2_592_000);
    }

    #[tokio::test]
    async fn invalid_url_is_a_connection_error() {
        let error = RedisKeyValueStore::connect("not-a-redis-url").await.expect_err("invalid url");
        assert!(matches!(error, StoreError::Connection(_)));
    }
}
