//! The pipeline engine itself (spec §4.H). Standard behaviors run in
//! canonical order — Tracing, Logging, Idempotency, DistributedLock,
//! Validation, Resilience, Outbox — around the handler invocation.
//! Grounded on `fc-router::mediator`'s call chain: that code inlines
//! the same stage ordering (circuit breaker -> retry -> the HTTP call)
//! as sequential `if`/`match` logic rather than a generic behavior
//! list, because the teacher's pipeline is fixed per mediator, not
//! user-extensible — this crate keeps that same "fixed canonical
//! order, attribute-gated" shape for the seven standard stages instead
//! of building a generic middleware-chain abstraction for them.
//!
//! Callers can still extend the chain via `registerBehavior` (spec
//! §4.I, see `behavior.rs`): those behaviors wrap the combined
//! Validation+Resilience+handler core as a single unit, ordered and
//! gated by `BehaviorDescriptor`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use catga_core::{CatgaResult, ErrorCode, Failure};
use catga_idempotency::{IdempotencyStore, ProcessOutcome};
use catga_lock::DistributedLock;
use catga_outbox::{NewOutboxRecord, OutboxStore};
use catga_resilience::ResiliencePipeline;
use catga_serde::Serializer;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::behavior::{BehaviorRegistry, NextFn};
use crate::context::DispatchContext;
use crate::plan::{expand_lock_key, PipelinePlan};

pub struct PipelineDeps<S: Serializer> {
    pub idempotency: Arc<IdempotencyStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub resilience: Arc<ResiliencePipeline>,
    pub outbox: Option<Arc<dyn OutboxStore>>,
    pub serializer: S,
    /// Behaviors installed via `registerBehavior` (spec §4.I), run
    /// around the Validation/Resilience/handler core alongside the
    /// seven canonical stages.
    pub custom_behaviors: Arc<BehaviorRegistry>,
}

pub struct Pipeline<S: Serializer> {
    plan: PipelinePlan,
    deps: PipelineDeps<S>,
}

impl<S: Serializer> Pipeline<S> {
    pub fn new(plan: PipelinePlan, deps: PipelineDeps<S>) -> Self {
        Self { plan, deps }
    }

    /// Dispatches `handler` through the standard behavior chain.
    /// `validate` runs the Validation stage (spec §4.H stage 5); return
    /// `Err(message)` to short-circuit with `ValidationFailed`.
    pub async fn dispatch<T, F, Fut>(
        &self,
        ctx: &DispatchContext,
        validate: impl FnOnce() -> Result<(), String>,
        handler: F,
    ) -> CatgaResult<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CatgaResult<T>> + Send,
    {
        let span = info_span!("dispatch", message_type = ctx.message_type, message_id = %ctx.message_id, correlation_id = ?ctx.correlation_id);
        self.dispatch_inner(ctx, validate, handler).instrument(span).await
    }

    async fn dispatch_inner<T, F, Fut>(
        &self,
        ctx: &DispatchContext,
        validate: impl FnOnce() -> Result<(), String>,
        handler: F,
    ) -> CatgaResult<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CatgaResult<T>> + Send,
    {
        let started = std::time::Instant::now();
        debug!("dispatch started");

        if ctx.cancellation.is_cancelled() {
            return CatgaResult::failure(ErrorCode::Cancelled, "cancelled before dispatch began");
        }

        // 3. Idempotency.
        if self.plan.idempotent {
            match self.deps.idempotency.try_begin_process(&ctx.message_id) {
                ProcessOutcome::Duplicate => {
                    if let Some(cached) = self.deps.idempotency.get_cached(&ctx.message_id) {
                        if let Ok(value) = self.deps.serializer.deserialize::<T>(&cached) {
                            debug!("idempotency hit, short-circuiting with cached result");
                            return CatgaResult::success(value);
                        }
                    }
                    return CatgaResult::success_empty();
                }
                ProcessOutcome::InProgress => {
                    return CatgaResult::failure(ErrorCode::PipelineFailed, "duplicate message already in flight");
                }
                ProcessOutcome::New => {}
            }
        }

        // 4. DistributedLock.
        let lock_handle = match &self.plan.lock_key_template {
            Some(template) => {
                let key = expand_lock_key(template, &ctx.metadata);
                match self.deps.lock.try_acquire(&key, Duration::from_secs(30), Duration::from_secs(5)).await {
                    Ok(Some(handle)) => Some(handle),
                    Ok(None) => return CatgaResult::failure(ErrorCode::LockFailed, format!("could not acquire lock {key}")),
                    Err(e) => return CatgaResult::failure(ErrorCode::LockFailed, e.to_string()),
                }
            }
            None => None,
        };

        let result = self
            .run_custom_behaviors(ctx, move || self.run_validated_and_resilient(ctx, validate, handler).boxed())
            .await;

        if let Some(handle) = &lock_handle {
            if let Err(e) = self.deps.lock.release(handle).await {
                warn!(error = %e, "failed to release distributed lock");
            }
        }

        // Cache the result for idempotency (spec §4.H stage 3: "on miss
        // continue, then cache the successful result").
        if self.plan.idempotent {
            if let CatgaResult::Success { value: Some(v), .. } = &result {
                if let Ok(bytes) = self.deps.serializer.serialize(v) {
                    self.deps.idempotency.complete(&ctx.message_id, Some(bytes));
                } else {
                    self.deps.idempotency.complete(&ctx.message_id, None);
                }
            } else if matches!(result, CatgaResult::Success { .. }) {
                self.deps.idempotency.complete(&ctx.message_id, None);
            }
        }

        // 7. Outbox (events only; gated by the mediator's event
        // registration, spec §4.H stage 7).
        if self.plan.append_to_outbox {
            if let (Some(outbox), CatgaResult::Success { value: Some(v), .. }) = (&self.deps.outbox, &result) {
                if let Ok(payload) = self.deps.serializer.serialize(v) {
                    let record = NewOutboxRecord {
                        message_id: ctx.message_id.clone(),
                        correlation_id: ctx.correlation_id.clone(),
                        message_type: ctx.message_type.to_string(),
                        payload,
                    };
                    if let Err(e) = outbox.append(record).await {
                        error!(error = %e, "failed to append outbox record after successful handler");
                        return CatgaResult::failure(ErrorCode::PersistenceFailed, e.to_string());
                    }
                }
            }
        }

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, success = result.is_success(), "dispatch finished");
        result
    }

    async fn run_validated_and_resilient<T, F, Fut>(
        &self,
        ctx: &DispatchContext,
        validate: impl FnOnce() -> Result<(), String>,
        handler: F,
    ) -> CatgaResult<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CatgaResult<T>> + Send,
    {
        // 5. Validation.
        if let Err(message) = validate() {
            return CatgaResult::failure(ErrorCode::ValidationFailed, message);
        }

        if ctx.cancellation.is_cancelled() {
            return CatgaResult::failure(ErrorCode::Cancelled, "cancelled before handler invocation");
        }

        // 6. Resilience (timeout/retry/bulkhead/circuit-breaker).
        let last_failure: parking_lot::Mutex<Option<Failure>> = parking_lot::Mutex::new(None);
        let outcome = self
            .deps
            .resilience
            .execute(|| async {
                let result = handler().await;
                match result {
                    CatgaResult::Success { value, .. } => Ok(value),
                    CatgaResult::Failure(failure) => {
                        let code = failure.code;
                        *last_failure.lock() = Some(failure);
                        Err(code)
                    }
                }
            })
            .await;

        match outcome {
            Ok(Some(value)) => CatgaResult::success(value),
            Ok(None) => CatgaResult::success_empty(),
            Err(code) => match last_failure.lock().take() {
                Some(failure) => CatgaResult::Failure(failure),
                None => CatgaResult::failure(code, code.to_string()),
            },
        }
    }

    /// Composes behaviors registered via `registerBehavior` inside-out
    /// around `handler` (lowest `order` outermost, spec §3
    /// "BehaviorDescriptor") and runs the chain once. A no-op when
    /// nothing is registered or nothing matches the dispatch's
    /// metadata.
    async fn run_custom_behaviors<'a, T, H>(&'a self, ctx: &'a DispatchContext, handler: H) -> CatgaResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        H: FnOnce() -> BoxFuture<'a, CatgaResult<T>> + Send + 'a,
    {
        let applicable = self.deps.custom_behaviors.applicable(&ctx.metadata);
        if applicable.is_empty() {
            return handler().await;
        }

        let mut next: NextFn<'a> = Box::new(move || {
            async move {
                match handler().await {
                    CatgaResult::Success { value: Some(v), metadata } => match serde_json::to_vec(&v) {
                        Ok(bytes) => CatgaResult::Success { value: Some(bytes), metadata },
                        Err(e) => CatgaResult::failure(ErrorCode::SerializationFailed, e.to_string()),
                    },
                    CatgaResult::Success { value: None, metadata } => CatgaResult::Success { value: None, metadata },
                    CatgaResult::Failure(f) => CatgaResult::Failure(f),
                }
            }
            .boxed()
        });

        for behavior in applicable.into_iter().rev() {
            let meta = ctx.metadata.clone();
            let prev = next;
            next = Box::new(move || async move { behavior.invoke(&meta, prev).await }.boxed());
        }

        match next().await {
            CatgaResult::Success { value: Some(bytes), metadata } => match serde_json::from_slice::<T>(&bytes) {
                Ok(v) => CatgaResult::Success { value: Some(v), metadata },
                Err(e) => CatgaResult::failure(ErrorCode::SerializationFailed, e.to_string()),
            },
            CatgaResult::Success { value: None, metadata } => CatgaResult::Success { value: None, metadata },
            CatgaResult::Failure(f) => CatgaResult::Failure(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{BehaviorCondition, CustomBehavior};
    use async_trait::async_trait;
    use catga_core::{BehaviorDescriptor, Metadata};
    use catga_lock::InMemoryLock;
    use catga_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceConfig};
    use catga_serde::JsonSerializer;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderCreated {
        order_id: String,
    }

    fn test_pipeline(plan: PipelinePlan) -> Pipeline<JsonSerializer> {
        test_pipeline_with_behaviors(plan, BehaviorRegistry::new())
    }

    fn test_pipeline_with_behaviors(plan: PipelinePlan, custom_behaviors: BehaviorRegistry) -> Pipeline<JsonSerializer> {
        let breaker = Arc::new(CircuitBreaker::new("test", CircuitBreakerConfig::default()));
        let resilience = Arc::new(ResiliencePipeline::new("test", ResilienceConfig::default(), breaker));
        Pipeline::new(
            plan,
            PipelineDeps {
                idempotency: Arc::new(IdempotencyStore::with_defaults()),
                lock: Arc::new(InMemoryLock::new()),
                resilience,
                outbox: None,
                serializer: JsonSerializer,
                custom_behaviors: Arc::new(custom_behaviors),
            },
        )
    }

    #[tokio::test]
    async fn happy_path_invokes_handler_once() {
        let pipeline = test_pipeline(PipelinePlan::default());
        let calls = AtomicU32::new(0);
        let ctx = DispatchContext::new("M1", "CreateOrder").with_correlation("C1");
        let result = pipeline
            .dispatch(&ctx, || Ok(()), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CatgaResult::success(OrderCreated { order_id: "O1".into() })
            })
            .await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idempotent_replay_short_circuits_without_reinvoking_handler() {
        let mut plan = PipelinePlan::default();
        plan.idempotent = true;
        let pipeline = test_pipeline(plan);
        let calls = Arc::new(AtomicU32::new(0));

        let ctx = DispatchContext::new("M1", "CreateOrder");
        let c = calls.clone();
        let first = pipeline
            .dispatch(&ctx, || Ok(()), move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    CatgaResult::success(OrderCreated { order_id: "O1".into() })
                }
            })
            .await;
        assert!(first.is_success());

        let c2 = calls.clone();
        let second = pipeline
            .dispatch(&ctx, || Ok(()), move || {
                let c2 = c2.clone();
                async move {
                    c2.fetch_add(1, Ordering::SeqCst);
                    CatgaResult::success(OrderCreated { order_id: "SHOULD_NOT_APPEAR".into() })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must not re-invoke on replay");
        assert_eq!(second.value(), Some(&OrderCreated { order_id: "O1".into() }));
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_before_handler() {
        let pipeline = test_pipeline(PipelinePlan::default());
        let calls = AtomicU32::new(0);
        let ctx = DispatchContext::new("M2", "CreateOrder");
        let result: CatgaResult<OrderCreated> = pipeline
            .dispatch(&ctx, || Err("qty must be positive".into()), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CatgaResult::success(OrderCreated { order_id: "O1".into() })
            })
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct RecordOrder(&'static str, Arc<std::sync::Mutex<Vec<&'static str>>>);
    #[async_trait]
    impl CustomBehavior for RecordOrder {
        async fn invoke(&self, _metadata: &Metadata, next: NextFn<'_>) -> CatgaResult<Vec<u8>> {
            self.1.lock().unwrap().push(self.0);
            next().await
        }
    }

    #[tokio::test]
    async fn registered_behaviors_run_in_ascending_order_around_handler() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));
        let mut registry = BehaviorRegistry::new();
        registry.register_behavior(BehaviorDescriptor::new(20, "second"), Arc::new(RecordOrder("second", order.clone())));
        registry.register_behavior(BehaviorDescriptor::new(10, "first"), Arc::new(RecordOrder("first", order.clone())));

        let pipeline = test_pipeline_with_behaviors(PipelinePlan::default(), registry);
        let ctx = DispatchContext::new("M3", "CreateOrder");
        let result = pipeline.dispatch(&ctx, || Ok(()), || async { CatgaResult::success(OrderCreated { order_id: "O1".into() }) }).await;

        assert!(result.is_success());
        assert_eq!(result.value(), Some(&OrderCreated { order_id: "O1".into() }));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    struct FlagOnInvoke(Arc<std::sync::atomic::AtomicBool>);
    #[async_trait]
    impl CustomBehavior for FlagOnInvoke {
        async fn invoke(&self, _metadata: &Metadata, next: NextFn<'_>) -> CatgaResult<Vec<u8>> {
            self.0.store(true, Ordering::SeqCst);
            next().await
        }
    }

    struct NeverMatches;
    impl BehaviorCondition for NeverMatches {
        fn evaluate(&self, _metadata: &Metadata) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn behavior_with_unmet_condition_is_skipped() {
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut registry = BehaviorRegistry::new();
        registry.register_condition("never", Arc::new(NeverMatches));
        registry.register_behavior(BehaviorDescriptor::new(10, "gated").with_condition("never"), Arc::new(FlagOnInvoke(invoked.clone())));

        let pipeline = test_pipeline_with_behaviors(PipelinePlan::default(), registry);
        let ctx = DispatchContext::new("M4", "CreateOrder");
        let result = pipeline.dispatch(&ctx, || Ok(()), || async { CatgaResult::success(OrderCreated { order_id: "O1".into() }) }).await;

        assert!(result.is_success());
        assert!(!invoked.load(Ordering::SeqCst));
    }
}
