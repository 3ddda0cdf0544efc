//! Redis-backed flow store. CAS updates use a Lua check-and-set,
//! the same idiom `catga-lock::redis_lock` uses for fencing-token
//! release — here the "token" is the snapshot's `version`.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::snapshot::{FlowSnapshot, ForEachProgress, WaitCondition};
use crate::store::{FlowStore, FlowStoreError};

const CAS_UPDATE_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current == false then
    return -1
end
local currentVersion = tonumber(cjson.decode(current)["version"])
if currentVersion ~= tonumber(ARGV[2]) then
    return currentVersion
end
redis.call("SET", KEYS[1], ARGV[1])
return -2
"#;

pub struct RedisFlowStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisFlowStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, key_prefix: "catga:flow:".to_string() }
    }

    fn flow_key(&self, flow_id: &str) -> String {
        format!("{}snapshot:{}", self.key_prefix, flow_id)
    }

    fn wait_key(&self, flow_id: &str) -> String {
        format!("{}wait:{}", self.key_prefix, flow_id)
    }

    fn foreach_key(&self, flow_id: &str, step_path: &str) -> String {
        format!("{}foreach:{}:{}", self.key_prefix, flow_id, step_path)
    }

    fn non_terminal_set_key(&self) -> String {
        format!("{}non_terminal", self.key_prefix)
    }

    fn wait_deadlines_key(&self) -> String {
        format!("{}wait_deadlines", self.key_prefix)
    }

    fn backend_err(e: impl std::fmt::Display) -> FlowStoreError {
        FlowStoreError::Backend(e.to_string())
    }
}

#[async_trait]
impl FlowStore for RedisFlowStore {
    async fn create(&self, snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&snapshot).map_err(Self::backend_err)?;
        let key = self.flow_key(&snapshot.flow_id);
        let _: () = conn.set(&key, json).await.map_err(Self::backend_err)?;
        if !snapshot.status.is_terminal() {
            let _: () = conn.sadd(self.non_terminal_set_key(), &snapshot.flow_id).await.map_err(Self::backend_err)?;
        }
        Ok(())
    }

    async fn get(&self, flow_id: &str) -> Result<Option<FlowSnapshot>, FlowStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.flow_key(flow_id)).await.map_err(Self::backend_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(Self::backend_err)).transpose()
    }

    async fn update(&self, mut snapshot: FlowSnapshot) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let key = self.flow_key(&snapshot.flow_id);
        let expected_version = snapshot.version;
        snapshot.version += 1;
        snapshot.updated_at = Utc::now();
        let json = serde_json::to_string(&snapshot).map_err(Self::backend_err)?;

        let result: i64 = Script::new(CAS_UPDATE_SCRIPT)
            .key(&key)
            .arg(&json)
            .arg(expected_version)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::backend_err)?;

        if result == -1 {
            return Err(FlowStoreError::NotFound(snapshot.flow_id));
        }
        if result != -2 {
            return Err(FlowStoreError::VersionConflict { flow_id: snapshot.flow_id, expected: expected_version, actual: result });
        }

        if snapshot.status.is_terminal() {
            let _: () = conn.srem(self.non_terminal_set_key(), &snapshot.flow_id).await.map_err(Self::backend_err)?;
        } else {
            let _: () = conn.sadd(self.non_terminal_set_key(), &snapshot.flow_id).await.map_err(Self::backend_err)?;
        }
        Ok(())
    }

    async fn delete(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.flow_key(flow_id)).await.map_err(Self::backend_err)?;
        let _: () = conn.srem(self.non_terminal_set_key(), flow_id).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn set_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        self.update_wait_condition(condition).await
    }

    async fn get_wait_condition(&self, flow_id: &str) -> Result<Option<WaitCondition>, FlowStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.wait_key(flow_id)).await.map_err(Self::backend_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(Self::backend_err)).transpose()
    }

    async fn update_wait_condition(&self, condition: WaitCondition) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&condition).map_err(Self::backend_err)?;
        let _: () = conn.set(self.wait_key(&condition.flow_id), json).await.map_err(Self::backend_err)?;
        match condition.deadline {
            Some(deadline) => {
                let _: () = conn.zadd(self.wait_deadlines_key(), &condition.flow_id, deadline.timestamp()).await.map_err(Self::backend_err)?;
            }
            None => {
                let _: () = conn.zrem(self.wait_deadlines_key(), &condition.flow_id).await.map_err(Self::backend_err)?;
            }
        }
        Ok(())
    }

    async fn clear_wait_condition(&self, flow_id: &str) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.wait_key(flow_id)).await.map_err(Self::backend_err)?;
        let _: () = conn.zrem(self.wait_deadlines_key(), flow_id).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get_timed_out_wait_conditions(&self) -> Result<Vec<WaitCondition>, FlowStoreError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();
        let ids: Vec<String> = conn.zrangebyscore(self.wait_deadlines_key(), 0, now).await.map_err(Self::backend_err)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(condition) = self.get_wait_condition(&id).await? {
                out.push(condition);
            }
        }
        Ok(out)
    }

    async fn save_foreach_progress(&self, progress: ForEachProgress) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&progress).map_err(Self::backend_err)?;
        let _: () = conn.set(self.foreach_key(&progress.flow_id, &progress.step_path), json).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn get_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<Option<ForEachProgress>, FlowStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.foreach_key(flow_id, step_path)).await.map_err(Self::backend_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(Self::backend_err)).transpose()
    }

    async fn clear_foreach_progress(&self, flow_id: &str, step_path: &str) -> Result<(), FlowStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.foreach_key(flow_id, step_path)).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<FlowSnapshot>, FlowStoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.non_terminal_set_key()).await.map_err(Self::backend_err)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = self.get(&id).await? {
                if !snapshot.status.is_terminal() {
                    out.push(snapshot);
                }
            }
        }
        Ok(out)
    }
}
