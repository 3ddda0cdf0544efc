//! In-memory flow store — the reference backend the others must stay
//! behaviorally identical to (spec §4.M).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::snapshot::{path_key, FlowSnapshot, FlowStatus, ForEachProgress, WaitCondition};
use crate::store::{FlowStore, FlowStoreError};

#[derive(Default)]
struct State {
    flows: HashMap<String, FlowSnapshot>,
    waits: HashMap<String, WaitCondition>,
    foreach: HashMap<(String, String), ForEachProgress>,
}

#[derive(Default)]
pub struct InMemoryFlowStore {
    state: Mutex<State>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn create(&self, snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        self.state.lock().flows.insert(snapshot.flow_id.clone(), snapshot);
        Ok(())
    }

    async fn get(&self, flow_id: &str) -> Result<Option<FlowSnapshot>, FlowStoreError> {
        Ok(self.state.lock().flows.get(flow_id).cloned())
    }

    async fn update(&self, mut snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        let mut state = self.state.lock();
        let current = state.flows.get(&snapshot.flow_id).ok_or_else(|| FlowStoreError::NotFound(snapshot.flow_id.clone()))?;
        if current.version != snapshot.version {
            return Err(FlowStoreError::VersionConflict { flow_id: snapshot.flow_id, expected: snapshot.version, actual: current.version });
        }
        snapshot.version += 1;
        snapshot.updated_at = Utc::now();
        state.flows.insert(snapshot.flow_id.clone(), snapshot);
        Ok(())
    }

    async fn delete(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        self.state.lock().flows.remove(flow_id);
        Ok(())
    }

    async fn set_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        self.state.lock().waits.insert(condition.flow_id.clone(), condition);
        Ok(())
    }

    async fn get_wait_condition(&self, flow_id: &str) -> Result<Option<WaitCondition>, FlowStoreError> {
        Ok(self.state.lock().waits.get(flow_id).cloned())
    }

    async fn update_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        self.state.lock().waits.insert(condition.flow_id.clone(), condition);
        Ok(())
    }

    async fn clear_wait_condition(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        self.state.lock().waits.remove(flow_id);
        Ok(())
    }

    async fn get_timed_out_wait_conditions(&self) -> Result<Vec<WaitCondition>, FlowStoreError> {
        let now = Utc::now();
        Ok(self.state.lock().waits.values().filter(|w| w.is_timed_out(now)).cloned().collect())
    }

    async fn save_foreach_progress(&self, progress: ForEachProgress) -> Result<(), FlowStoreError> {
        let key = (progress.flow_id.clone(), progress.step_path.clone());
        self.state.lock().foreach.insert(key, progress);
        Ok(())
    }

    async fn get_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<Option<ForEachProgress>, FlowStoreError> {
        Ok(self.state.lock().foreach.get(&(flow_id.to_string(), step_path.to_string())).cloned())
    }

    async fn clear_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<(), FlowStoreError> {
        self.state.lock().foreach.remove(&(flow_id.to_string(), step_path.to_string()));
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<FlowSnapshot>, FlowStoreError> {
        Ok(self.state.lock().flows.values().filter(|f| !f.status.is_terminal()).cloned().collect())
    }
}

/// Dedup key for at-most-once `ForEach` item execution (spec §4.L).
pub fn foreach_item_key(flow_id: &str, step_path: &[usize], item_index: usize) -> String {
    format!("{flow_id}:{}:{item_index}", path_key(step_path))
}
