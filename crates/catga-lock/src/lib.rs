//! Named distributed lock (spec §4.E), grounded on
//! `fc-standby::leader::LeaderElection` — same Redis `SET NX EX` +
//! Lua check-and-delete idiom, generalized from one hardcoded
//! leadership key to arbitrary named locks with a random fencing
//! token per acquisition (the teacher's `instance_id` becomes the
//! per-call token instead of a per-process identity).

pub mod memory;
pub mod redis_lock;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// spec §3 `LockHandle`. Releasing requires `token` to match the
/// value currently stored for `key` — this prevents a caller whose
/// TTL already expired from releasing the next holder's lock.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub key: String,
    pub token: String,
    pub acquired_at: Instant,
    pub ttl: Duration,
}

/// spec §4.E: "at most one holder per key cluster-wide... Reentrance
/// is not supported (by design)."
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempts to acquire `key`, retrying (with a short fixed backoff)
    /// until `wait_timeout` elapses. Returns `None` on timeout, never
    /// blocks past `wait_timeout`.
    async fn try_acquire(&self, key: &str, ttl: Duration, wait_timeout: Duration) -> Result<Option<LockHandle>, LockError>;

    /// No-op unless `handle.token` still matches the stored value
    /// (spec §4.E contract).
    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError>;
}

pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub use memory::InMemoryLock;
pub use redis_lock::RedisLock;
