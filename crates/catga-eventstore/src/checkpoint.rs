//! Projection checkpoint store (spec §4/§2 component O): a
//! per-projection cursor over an event stream's sequence. Grounded on
//! `fc-stream::checkpoint::CheckpointStore`'s Mongo/Redis/Memory
//! trio — this workspace substitutes the Mongo backend with none
//! (Redis + in-memory only), since `mongodb` never makes it into this
//! crate's dependency stack; see DESIGN.md.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::EventStoreError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed position for `projection`, or `None` if it has
    /// never run.
    async fn get_checkpoint(&self, projection: &str) -> Result<Option<i64>, EventStoreError>;

    async fn save_checkpoint(&self, projection: &str, position: i64) -> Result<(), EventStoreError>;

    /// Clears a checkpoint, e.g. to force a projection to replay from
    /// the start after a stale-cursor recovery.
    async fn clear_checkpoint(&self, projection: &str) -> Result<(), EventStoreError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, i64>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get_checkpoint(&self, projection: &str) -> Result<Option<i64>, EventStoreError> {
        Ok(self.checkpoints.lock().get(projection).copied())
    }

    async fn save_checkpoint(&self, projection: &str, position: i64) -> Result<(), EventStoreError> {
        self.checkpoints.lock().insert(projection.to_string(), position);
        Ok(())
    }

    async fn clear_checkpoint(&self, projection: &str) -> Result<(), EventStoreError> {
        self.checkpoints.lock().remove(projection);
        Ok(())
    }
}

pub struct RedisCheckpointStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCheckpointStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, key_prefix: "catga:checkpoint:".to_string() }
    }

    fn key(&self, projection: &str) -> String {
        format!("{}{}", self.key_prefix, projection)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn get_checkpoint(&self, projection: &str) -> Result<Option<i64>, EventStoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(self.key(projection)).await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(value)
    }

    async fn save_checkpoint(&self, projection: &str, position: i64) -> Result<(), EventStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key(projection), position).await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn clear_checkpoint(&self, projection: &str) -> Result<(), EventStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(projection)).await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_projection_has_no_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        assert_eq!(store.get_checkpoint("orders-projection").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint("orders-projection", 42).await.unwrap();
        assert_eq!(store.get_checkpoint("orders-projection").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn clear_removes_the_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint("orders-projection", 42).await.unwrap();
        store.clear_checkpoint("orders-projection").await.unwrap();
        assert_eq!(store.get_checkpoint("orders-projection").await.unwrap(), None);
    }
}
