//! Sequential saga steps with reverse compensation (spec §4.K),
//! grounded on `other_examples/.../saga_executor.rs`'s
//! `PersistedSagaState`/`SagaExecutorConfig` shape — that executor's
//! "execute step, persist state, compensate on failure" loop is the
//! same contour, generalized here to an in-memory step list (spec §2
//! row L: "in-memory unless durable saga store is provided").

use std::time::{Duration, Instant};

use async_trait::async_trait;
use catga_core::{CatgaResult, Failure};
use tracing::{error, info, warn};

/// One step in a saga. `Ctx` is the saga's shared working state,
/// threaded mutably through every step and compensation in order.
#[async_trait]
pub trait SagaStep<Ctx: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut Ctx) -> CatgaResult<()>;

    /// Reverses this step's effect. Default is a no-op success, for
    /// steps with nothing to undo (e.g. pure reads).
    async fn compensate(&self, _ctx: &mut Ctx) -> CatgaResult<()> {
        CatgaResult::success_empty()
    }

    /// Per-step timeout (spec §4.K "timeouts per step").
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Spec §9 open question: what severity a compensation failure gets.
/// The spec's literal text treats any compensation failure as `Failed`
/// requiring manual intervention; this policy only controls whether
/// the executor keeps compensating the remaining steps after one
/// compensation call fails, not the final status (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationFailurePolicy {
    /// Stop compensating as soon as one compensation call fails.
    StopImmediately,
    /// Keep compensating the remaining steps even after a failure,
    /// collecting every compensation error.
    BestEffort,
}

impl Default for CompensationFailurePolicy {
    fn default() -> Self {
        CompensationFailurePolicy::StopImmediately
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Succeeded,
    Compensated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcomeKind {
    Succeeded,
    Failed,
    Compensated,
    CompensationFailed,
    NotRun,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcomeKind,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub saga_id: String,
    pub status: SagaStatus,
    pub steps: Vec<StepReport>,
    pub duration: Duration,
    pub error: Option<Failure>,
}

pub struct SagaExecutor<Ctx: Send> {
    steps: Vec<Box<dyn SagaStep<Ctx>>>,
    compensation_policy: CompensationFailurePolicy,
}

impl<Ctx: Send> SagaExecutor<Ctx> {
    pub fn new(steps: Vec<Box<dyn SagaStep<Ctx>>>) -> Self {
        Self { steps, compensation_policy: CompensationFailurePolicy::default() }
    }

    pub fn with_compensation_policy(mut self, policy: CompensationFailurePolicy) -> Self {
        self.compensation_policy = policy;
        self
    }

    async fn run_step_with_timeout(step: &dyn SagaStep<Ctx>, ctx: &mut Ctx) -> CatgaResult<()> {
        match step.timeout() {
            Some(duration) => match tokio::time::timeout(duration, step.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => CatgaResult::failure(catga_core::ErrorCode::Timeout, format!("step '{}' timed out", step.name())),
            },
            None => step.execute(ctx).await,
        }
    }

    /// Executes every step in order; on the first failure, runs
    /// `compensate` for every previously-succeeded step in reverse
    /// order (spec §4.K).
    pub async fn run(&self, saga_id: impl Into<String>, ctx: &mut Ctx) -> SagaOutcome {
        let saga_id = saga_id.into();
        let started = Instant::now();
        let mut reports = Vec::with_capacity(self.steps.len());
        let mut failure_at: Option<(usize, Failure)> = None;

        for (index, step) in self.steps.iter().enumerate() {
            let step_started = Instant::now();
            info!(saga_id = %saga_id, step = step.name(), "executing saga step");
            let result = Self::run_step_with_timeout(step.as_ref(), ctx).await;
            let duration = step_started.elapsed();
            match result {
                CatgaResult::Success { .. } => {
                    reports.push(StepReport { name: step.name().to_string(), outcome: StepOutcomeKind::Succeeded, duration });
                }
                CatgaResult::Failure(failure) => {
                    warn!(saga_id = %saga_id, step = step.name(), code = %failure.code, "saga step failed, beginning compensation");
                    reports.push(StepReport { name: step.name().to_string(), outcome: StepOutcomeKind::Failed, duration });
                    failure_at = Some((index, failure));
                    break;
                }
            }
        }

        let Some((failed_index, failure)) = failure_at else {
            return SagaOutcome { saga_id, status: SagaStatus::Succeeded, steps: reports, duration: started.elapsed(), error: None };
        };

        let mut compensation_failed = false;
        for index in (0..failed_index).rev() {
            let step = &self.steps[index];
            let step_started = Instant::now();
            let result = step.compensate(ctx).await;
            let duration = step_started.elapsed();
            match result {
                CatgaResult::Success { .. } => {
                    reports.push(StepReport { name: step.name().to_string(), outcome: StepOutcomeKind::Compensated, duration });
                }
                CatgaResult::Failure(comp_failure) => {
                    error!(saga_id = %saga_id, step = step.name(), code = %comp_failure.code, "compensation failed");
                    reports.push(StepReport { name: step.name().to_string(), outcome: StepOutcomeKind::CompensationFailed, duration });
                    compensation_failed = true;
                    if self.compensation_policy == CompensationFailurePolicy::StopImmediately {
                        for remaining in (0..index).rev() {
                            reports.push(StepReport { name: self.steps[remaining].name().to_string(), outcome: StepOutcomeKind::NotRun, duration: Duration::ZERO });
                        }
                        break;
                    }
                }
            }
        }

        let status = if compensation_failed { SagaStatus::Failed } else { SagaStatus::Compensated };
        SagaOutcome { saga_id, status, steps: reports, duration: started.elapsed(), error: Some(failure) }
    }
}
