use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, RedisError, Script};

use super::{CoordinationStore, ReleaseOutcome, SetOutcome, StoreError};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Sets KEYS[1] to ARGV[2] only while it still holds ARGV[1].
const SWAP_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  redis.call("SET", KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Stops a wallet whose state KEYS[1] still holds ARGV[1]: writes ARGV[2]
/// and removes shard ARGV[3] from the running set KEYS[2].
const STOP_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  redis.call("SET", KEYS[1], ARGV[2])
  redis.call("SREM", KEYS[2], ARGV[3])
  return 1
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Connection handle shared by all callers until `take` empties it.
struct ConnectionSlot<C>(Mutex<Option<C>>);

impl<C: Clone> ConnectionSlot<C> {
    fn new(conn: C) -> Self {
        Self(Mutex::new(Some(conn)))
    }

    fn checkout(&self) -> Result<C, StoreError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }

    fn take(&self) -> Option<C> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Redis-backed store over one multiplexed connection shared by all callers.
pub struct RedisStore {
    conn:    ConnectionSlot<MultiplexedConnection>,
    release: Script,
    swap:    Script,
    stop:    Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis coordination store");
        Ok(Self {
            conn:    ConnectionSlot::new(conn),
            release: Script::new(RELEASE_SCRIPT),
            swap:    Script::new(SWAP_SCRIPT),
            stop:    Script::new(STOP_SCRIPT),
        })
    }

    fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.conn.checkout()
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<SetOutcome, StoreError> {
        let mut conn = self.conn()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(if reply.is_some() { SetOutcome::Acquired } else { SetOutcome::Exists })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<ReleaseOutcome, StoreError> {
        let mut conn = self.conn()?;
        let deleted: i64 = self
            .release
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(if deleted > 0 { ReleaseOutcome::Released } else { ReleaseOutcome::Noop })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let swapped: i64 = self
            .swap
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped > 0)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        Ok(redis::cmd("MGET").arg(keys).query_async(&mut conn).await?)
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.sadd::<_, _, ()>(set, member).await?;
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.srem::<_, _, ()>(set, member).await?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn()?;
        Ok(conn.smembers::<_, Vec<String>>(set).await?)
    }

    async fn upsert_wallet(
        &self,
        state_key: &str,
        state_json: &str,
        known_set: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        redis::pipe()
            .atomic()
            .set(state_key, state_json)
            .ignore()
            .sadd(known_set, shard)
            .ignore()
            .sadd(running_set, shard)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn stop_wallet(
        &self,
        state_key: &str,
        expected: &str,
        state_json: &str,
        running_set: &str,
        shard: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let stopped: i64 = self
            .stop
            .key(state_key)
            .key(running_set)
            .arg(expected)
            .arg(state_json)
            .arg(shard)
            .invoke_async(&mut conn)
            .await?;
        Ok(stopped > 0)
    }

    /// Sends QUIT and drops the shared connection. Clones held by calls
    /// already in flight finish on their own.
    async fn close(&self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = redis::cmd("QUIT").query_async::<_, ()>(&mut conn).await {
            tracing::debug!(error = %e, "Redis QUIT failed; dropping connection");
        }
        Ok(())
    }
}
