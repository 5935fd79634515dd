//! Shared ephemeral state: GPU telemetry documents and rate-limit
//! counters, all with TTL semantics so stale entries age out on their own.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone)]
pub struct KvCache {
    conn: ConnectionManager,
}

impl KvCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), redis::RedisError> {
        let payload = serde_json::to_string(value).map_err(|e| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "serialize", e.to_string()))
        })?;
        let mut conn = self.conn.clone();
        conn.set_ex(key, payload, ttl_secs).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(payload) => serde_json::from_str(&payload).map(Some).map_err(|e| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "deserialize", e.to_string()))
            }),
            None => Ok(None),
        }
    }

    /// One atomic sliding-window step: prune expired members, record this
    /// hit, return the window population. The caller decides whether the
    /// hit stays (see [`KvCache::discard_window_member`]).
    pub async fn sliding_window_hit(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<u64, redis::RedisError> {
        let cutoff = now_ms.saturating_sub(window_ms);
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Rejected hits give their slot back so they cannot starve a client.
    pub async fn discard_window_member(
        &self,
        key: &str,
        member: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.zrem(key, member).await
    }
}
