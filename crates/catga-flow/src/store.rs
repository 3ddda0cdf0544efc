//! Flow store parity contract (spec §4.M). All three backends —
//! `InMemoryFlowStore`, `RedisFlowStore`, `NatsKvFlowStore` — must be
//! behaviorally identical; they differ only in mechanism. Grounded on
//! `fc-stream::checkpoint::CheckpointStore`'s multi-backend trait
//! shape, generalized to the three concrete backends spec §4.M names.

use async_trait::async_trait;
use thiserror::Error;

use crate::snapshot::{FlowSnapshot, ForEachProgress, WaitCondition};

#[derive(Debug, Error)]
pub enum FlowStoreError {
    #[error("flow store backend error: {0}")]
    Backend(String),
    #[error("flow {0} not found")]
    NotFound(String),
    #[error("optimistic update on flow {flow_id} failed: expected version {expected}, actual {actual}")]
    VersionConflict { flow_id: String, expected: i64, actual: i64 },
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn create(&self, snapshot: FlowSnapshot) -> Result<(), FlowStoreError>;

    async fn get(&self, flow_id: &str) -> Result<Option<FlowSnapshot>, FlowStoreError>;

    /// Succeeds only if the stored version equals `snapshot.version`;
    /// on success the stored version becomes `snapshot.version + 1`.
    async fn update(&self, snapshot: FlowSnapshot) -> Result<(), FlowStoreError>;

    async fn delete(&self, flow_id: &str) -> Result<(), FlowStoreError>;

    async fn set_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError>;

    async fn get_wait_condition(&self, flow_id: &str) -> Result<Option<WaitCondition>, FlowStoreError>;

    async fn update_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError>;

    async fn clear_wait_condition(&self, flow_id: &str) -> Result<(), FlowStoreError>;

    /// Flows whose wait condition's deadline has passed, for the
    /// timeout sweep loop (spec §4.L).
    async fn get_timed_out_wait_conditions(&self) -> Result<Vec<WaitCondition>, FlowStoreError>;

    async fn save_foreach_progress(&self, progress: ForEachProgress) -> Result<(), FlowStoreError>;

    async fn get_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<Option<ForEachProgress>, FlowStoreError>;

    async fn clear_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<(), FlowStoreError>;

    /// Non-terminal flows, for the resume-after-restart recovery loop.
    async fn list_non_terminal(&self) -> Result<Vec<FlowSnapshot>, FlowStoreError>;
}
