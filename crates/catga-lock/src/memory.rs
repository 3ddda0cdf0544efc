//! In-process lock backend — used for single-node deployments and for
//! exercising the shared `DistributedLock` contract in tests without a
//! Redis dependency.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::sleep;

use crate::{new_token, DistributedLock, LockError, LockHandle};

struct Held {
    token: String,
    expires_at: Instant,
}

pub struct InMemoryLock {
    held: DashMap<String, Held>,
    poll_interval: Duration,
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self { held: DashMap::new(), poll_interval: Duration::from_millis(5) }
    }

    fn try_once(&self, key: &str, ttl: Duration) -> Option<LockHandle> {
        let now = Instant::now();
        let mut acquired = false;
        self.held
            .entry(key.to_string())
            .and_modify(|h| {
                if h.expires_at <= now {
                    h.token = new_token();
                    h.expires_at = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                Held { token: new_token(), expires_at: now + ttl }
            });

        if !acquired {
            return None;
        }
        let token = self.held.get(key).map(|h| h.token.clone())?;
        Some(LockHandle { key: key.to_string(), token, acquired_at: now, ttl })
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration, wait_timeout: Duration) -> Result<Option<LockHandle>, LockError> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            if let Some(handle) = self.try_once(key, ttl) {
                return Ok(Some(handle));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let Some(entry) = self.held.get(&handle.key) else {
            return Ok(false);
        };
        if entry.token != handle.token {
            return Ok(false);
        }
        drop(entry);
        self.held.remove(&handle.key);
        Ok(true)
    }
}
