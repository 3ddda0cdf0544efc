//! Redis backend, directly grounded on
//! `fc-standby::leader::LeaderElection`: `SET key token NX EX ttl` to
//! acquire, a Lua check-and-delete to release only when the token
//! still matches.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio::time::sleep;
use tracing::debug;

use crate::{new_token, DistributedLock, LockError, LockHandle};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLock {
    conn: ConnectionManager,
    key_prefix: String,
    poll_interval: Duration,
}

impl RedisLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, key_prefix: "catga:lock:".to_string(), poll_interval: Duration::from_millis(25) }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn try_once(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>, LockError> {
        let mut conn = self.conn.clone();
        let token = new_token();
        let redis_key = self.redis_key(key);

        let set: Option<String> = conn
            .set_options(
                &redis_key,
                &token,
                redis::SetOptions::default()
                    .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as usize))
                    .conditional_set(redis::ExistenceCheck::NX),
            )
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        if set.is_some() {
            debug!(key, "distributed lock acquired");
            Ok(Some(LockHandle { key: key.to_string(), token, acquired_at: Instant::now(), ttl }))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, key: &str, ttl: Duration, wait_timeout: Duration) -> Result<Option<LockHandle>, LockError> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            if let Some(handle) = self.try_once(key, ttl).await? {
                return Ok(Some(handle));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let redis_key = self.redis_key(&handle.key);
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&redis_key)
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(deleted == 1)
    }
}
