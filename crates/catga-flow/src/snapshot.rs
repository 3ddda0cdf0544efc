//! Persisted flow state (spec §3 `FlowSnapshot`/`WaitCondition`/`ForEachProgress`).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locates the node currently executing: a path of child indices from
/// the tree root, e.g. `[0, 2, 1]` is "first child's third child's
/// second child".
pub type Position = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    Running,
    WaitingSignal,
    WaitingTimer,
    Compensating,
    Succeeded,
    Failed,
    Cancelled,
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Succeeded | FlowStatus::Failed | FlowStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub flow_id: String,
    pub state_bytes: Vec<u8>,
    pub status: FlowStatus,
    pub position: Position,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowSnapshot {
    pub fn new(flow_id: impl Into<String>, state_bytes: Vec<u8>) -> Self {
        let now = Utc::now();
        Self { flow_id: flow_id.into(), state_bytes, status: FlowStatus::Running, position: Vec::new(), version: 0, created_at: now, updated_at: now }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitKind {
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitCondition {
    pub flow_id: String,
    pub kind: WaitKind,
    pub signal_keys: BTreeSet<String>,
    pub received: BTreeMap<String, Vec<u8>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl WaitCondition {
    pub fn new(flow_id: impl Into<String>, kind: WaitKind, signal_keys: BTreeSet<String>, deadline: Option<DateTime<Utc>>) -> Self {
        Self { flow_id: flow_id.into(), kind, signal_keys, received: BTreeMap::new(), deadline }
    }

    /// Spec §3: `All` completes when every signal key has arrived;
    /// `Any` completes as soon as one has.
    pub fn is_complete(&self) -> bool {
        match self.kind {
            WaitKind::All => self.signal_keys.iter().all(|k| self.received.contains_key(k)),
            WaitKind::Any => !self.received.is_empty(),
        }
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachProgress {
    pub flow_id: String,
    pub step_path: String,
    pub total: usize,
    pub completed: BTreeSet<usize>,
    pub results: BTreeMap<usize, Vec<u8>>,
    pub failed: BTreeMap<usize, String>,
}

impl ForEachProgress {
    pub fn new(flow_id: impl Into<String>, step_path: impl Into<String>, total: usize) -> Self {
        Self { flow_id: flow_id.into(), step_path: step_path.into(), total, completed: BTreeSet::new(), results: BTreeMap::new(), failed: BTreeMap::new() }
    }

    pub fn is_done(&self) -> bool {
        self.completed.len() + self.failed.len() >= self.total
    }

    /// Results in input order regardless of completion order (spec §4.L).
    pub fn ordered_results(&self) -> Vec<Option<&[u8]>> {
        (0..self.total).map(|i| self.results.get(&i).map(|v| v.as_slice())).collect()
    }
}

pub fn path_key(step_path: &[usize]) -> String {
    step_path.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(".")
}
