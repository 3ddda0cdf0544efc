//! NATS JetStream KV-backed flow store, the third of the spec's three
//! behaviorally-identical backends alongside `InMemoryFlowStore` and
//! `RedisFlowStore`. Grounded on the same store-parity shape as
//! `redis_store.rs`; CAS on `update` uses the KV bucket's own revision
//! number (`Store::update`) in place of Redis's Lua check-and-set,
//! since JetStream KV already exposes optimistic concurrency natively.
//!
//! KV buckets have no secondary indexes, so `list_non_terminal` and
//! `get_timed_out_wait_conditions` scan the bucket's keys rather than
//! maintaining a Redis-style set/sorted-set — functionally equivalent,
//! not performance-equivalent, which is all the store-parity contract
//! requires (see DESIGN.md).

use async_nats::jetstream::kv::Store;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;

use crate::snapshot::{FlowSnapshot, ForEachProgress, WaitCondition};
use crate::store::{FlowStore, FlowStoreError};

pub struct NatsKvFlowStore {
    kv: Store,
}

impl NatsKvFlowStore {
    pub fn new(kv: Store) -> Self {
        Self { kv }
    }

    fn snapshot_key(flow_id: &str) -> String {
        format!("flow.snapshot.{flow_id}")
    }

    fn wait_key(flow_id: &str) -> String {
        format!("flow.wait.{flow_id}")
    }

    fn foreach_key(flow_id: &str, step_path: &str) -> String {
        format!("flow.foreach.{flow_id}.{}", step_path.replace('.', "_"))
    }

    fn backend_err(e: impl std::fmt::Display) -> FlowStoreError {
        FlowStoreError::Backend(e.to_string())
    }

    async fn get_raw<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FlowStoreError> {
        let bytes = self.kv.get(key).await.map_err(Self::backend_err)?;
        bytes.map(|b| serde_json::from_slice(&b).map_err(Self::backend_err)).transpose()
    }
}

#[async_trait]
impl FlowStore for NatsKvFlowStore {
    async fn create(&self, snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        let key = Self::snapshot_key(&snapshot.flow_id);
        let json = serde_json::to_vec(&snapshot).map_err(Self::backend_err)?;
        self.kv.create(&key, json.into()).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get(&self, flow_id: &str) -> Result<Option<FlowSnapshot>, FlowStoreError> {
        self.get_raw(&Self::snapshot_key(flow_id)).await
    }

    async fn update(&self, mut snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        let key = Self::snapshot_key(&snapshot.flow_id);
        let entry = self.kv.entry(&key).await.map_err(Self::backend_err)?;
        let entry = entry.ok_or_else(|| FlowStoreError::NotFound(snapshot.flow_id.clone()))?;

        let current: FlowSnapshot = serde_json::from_slice(&entry.value).map_err(Self::backend_err)?;
        if current.version != snapshot.version {
            return Err(FlowStoreError::VersionConflict {
                flow_id: snapshot.flow_id,
                expected: snapshot.version,
                actual: current.version,
            });
        }

        snapshot.version += 1;
        snapshot.updated_at = Utc::now();
        let json = serde_json::to_vec(&snapshot).map_err(Self::backend_err)?;
        self.kv.update(&key, json.into(), entry.revision).await.map_err(|e| match e.kind() {
            async_nats::jetstream::kv::UpdateErrorKind::WrongLastRevision => FlowStoreError::VersionConflict {
                flow_id: snapshot.flow_id.clone(),
                expected: snapshot.version - 1,
                actual: entry.revision as i64,
            },
            _ => Self::backend_err(e),
        })?;
        Ok(())
    }

    async fn delete(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        self.kv.delete(Self::snapshot_key(flow_id)).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn set_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        self.update_wait_condition(condition).await
    }

    async fn get_wait_condition(&self, flow_id: &str) -> Result<Option<WaitCondition>, FlowStoreError> {
        self.get_raw(&Self::wait_key(flow_id)).await
    }

    async fn update_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        let key = Self::wait_key(&condition.flow_id);
        let json = serde_json::to_vec(&condition).map_err(Self::backend_err)?;
        self.kv.put(&key, json.into()).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn clear_wait_condition(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        self.kv.delete(Self::wait_key(flow_id)).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get_timed_out_wait_conditions(&self) -> Result<Vec<WaitCondition>, FlowStoreError> {
        let now = Utc::now();
        let mut out = Vec::new();
        let mut keys = self.kv.keys().await.map_err(Self::backend_err)?;
        while let Some(key) = keys.next().await {
            let key = key.map_err(Self::backend_err)?;
            if !key.starts_with("flow.wait.") {
                continue;
            }
            if let Some(condition) = self.get_raw::<WaitCondition>(&key).await? {
                if condition.deadline.is_some_and(|d| d <= now) {
                    out.push(condition);
                }
            }
        }
        Ok(out)
    }

    async fn save_foreach_progress(&self, progress: ForEachProgress) -> Result<(), FlowStoreError> {
        let key = Self::foreach_key(&progress.flow_id, &progress.step_path);
        let json = serde_json::to_vec(&progress).map_err(Self::backend_err)?;
        self.kv.put(&key, json.into()).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<Option<ForEachProgress>, FlowStoreError> {
        self.get_raw(&Self::foreach_key(flow_id, step_path)).await
    }

    async fn clear_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<(), FlowStoreError> {
        self.kv.delete(Self::foreach_key(flow_id, step_path)).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<FlowSnapshot>, FlowStoreError> {
        let mut out = Vec::new();
        let mut keys = self.kv.keys().await.map_err(Self::backend_err)?;
        while let Some(key) = keys.next().await {
            let key = key.map_err(Self::backend_err)?;
            if !key.starts_with("flow.snapshot.") {
                continue;
            }
            if let Some(snapshot) = self.get_raw::<FlowSnapshot>(&key).await? {
                if !snapshot.status.is_terminal() {
                    out.push(snapshot);
                }
            }
        }
        Ok(out)
    }
}
