//! Central dispatch orchestrator (spec §4.I), grounded on
//! `fc-router::manager::QueueManager` — the one place that resolves a
//! message to its worker(s), checks whether this node is allowed to
//! handle it, and runs it through the shared pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use catga_core::{BehaviorAttribute, BehaviorDescriptor, CatgaResult, ErrorCode, Failure, Metadata, MessageAttributes, RoutingAttribute};
use catga_idempotency::IdempotencyStore;
use catga_lock::{DistributedLock, LockHandle};
use catga_outbox::OutboxStore;
use catga_pipeline::{BehaviorCondition, BehaviorRegistry, CustomBehavior, DispatchContext, Pipeline, PipelineDeps, PipelinePlan};
use catga_resilience::{CircuitBreakerRegistry, ResilienceConfig, ResiliencePipeline};
use catga_serde::Serializer;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::{HandlerRegistry, Resolution, SharedRegistry};
use crate::routing::{check_routing, ClusterRole, StaticClusterRole};
use crate::EventHandler;
use crate::RequestHandler;

/// Shared infrastructure every dispatch is built against (spec §4.H's
/// standard behaviors). One `Mediator` is constructed per process and
/// handler registration is expected to happen once at startup (spec
/// §9 "global registration state ... frozen thereafter").
pub struct Mediator<S: Serializer + Clone + 'static> {
    registry: SharedRegistry,
    idempotency: Arc<IdempotencyStore>,
    lock: Arc<dyn DistributedLock>,
    breakers: Arc<CircuitBreakerRegistry>,
    resilience_config: ResilienceConfig,
    outbox: Option<Arc<dyn OutboxStore>>,
    serializer: S,
    role: Arc<dyn ClusterRole>,
    cluster_singleton_lease: Duration,
    custom_behaviors: Arc<Mutex<BehaviorRegistry>>,
}

pub struct MediatorDeps<S: Serializer + Clone + 'static> {
    pub idempotency: Arc<IdempotencyStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub resilience_config: ResilienceConfig,
    pub outbox: Option<Arc<dyn OutboxStore>>,
    pub serializer: S,
    pub role: Arc<dyn ClusterRole>,
}

impl<S: Serializer + Clone + 'static> Mediator<S> {
    pub fn new(deps: MediatorDeps<S>) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::new()),
            idempotency: deps.idempotency,
            lock: deps.lock,
            breakers: deps.breakers,
            resilience_config: deps.resilience_config,
            outbox: deps.outbox,
            serializer: deps.serializer,
            role: deps.role,
            cluster_singleton_lease: Duration::from_secs(30),
            custom_behaviors: Arc::new(Mutex::new(BehaviorRegistry::new())),
        }
    }

    /// `registerBehavior(behaviorFactory, order, condition?)` (spec
    /// §4.I): installs a custom behavior alongside the seven canonical
    /// pipeline stages, ordered and optionally gated by `descriptor`.
    /// Registration is write-only after startup, same as
    /// `register_request`/`register_event`.
    pub fn register_behavior(&self, descriptor: BehaviorDescriptor, behavior: Arc<dyn CustomBehavior>) {
        self.custom_behaviors.lock().unwrap().register_behavior(descriptor, behavior);
    }

    /// Registers the predicate a `BehaviorDescriptor.condition` name
    /// resolves to at dispatch time.
    pub fn register_behavior_condition(&self, name: &'static str, condition: Arc<dyn BehaviorCondition>) {
        self.custom_behaviors.lock().unwrap().register_condition(name, condition);
    }

    /// Convenience constructor for single-node deployments and tests,
    /// grounded on the same "solo role" shortcut `fc-standby` falls
    /// back to when no peer list is configured.
    pub fn solo(
        idempotency: Arc<IdempotencyStore>,
        lock: Arc<dyn DistributedLock>,
        outbox: Option<Arc<dyn OutboxStore>>,
        serializer: S,
    ) -> Self {
        Self::new(MediatorDeps {
            idempotency,
            lock,
            breakers: Arc::new(CircuitBreakerRegistry::new(Default::default())),
            resilience_config: ResilienceConfig::default(),
            outbox,
            serializer,
            role: Arc::new(StaticClusterRole::solo()),
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn register_request<Req, Resp, H>(&self, handler: H)
    where
        Req: 'static,
        Resp: 'static,
        H: RequestHandler<Req, Resp> + 'static,
    {
        let handler: Arc<dyn RequestHandler<Req, Resp>> = Arc::new(handler);
        self.registry.register_request::<Req, Arc<dyn RequestHandler<Req, Resp>>>(handler);
    }

    pub fn register_event<Evt, H>(&self, handler: H)
    where
        Evt: 'static,
        H: EventHandler<Evt> + 'static,
    {
        let handler: Arc<dyn EventHandler<Evt>> = Arc::new(handler);
        self.registry.register_event::<Evt, Arc<dyn EventHandler<Evt>>>(handler);
    }

    fn pipeline_for(&self, category: &str, behaviors: &[BehaviorAttribute]) -> Pipeline<S> {
        let plan = PipelinePlan::from_attributes(behaviors);
        let breaker_name = plan.circuit_breaker_name.clone().unwrap_or_else(|| category.to_string());
        let breaker = self.breakers.get_or_create(&breaker_name);
        let resilience = Arc::new(ResiliencePipeline::new(category.to_string(), self.resilience_config.clone(), breaker));
        let custom_behaviors = Arc::new(self.custom_behaviors.lock().unwrap().clone());
        Pipeline::new(
            plan,
            PipelineDeps {
                idempotency: self.idempotency.clone(),
                lock: self.lock.clone(),
                resilience,
                outbox: self.outbox.clone(),
                serializer: self.serializer.clone(),
                custom_behaviors,
            },
        )
    }

    /// Checks the `Broadcast`/`LeaderOnly`/`Sharded` routing attributes
    /// (spec §4.I). `ClusterSingleton` is handled separately by
    /// `acquire_cluster_singleton` since it needs the distributed lock,
    /// not just a role check.
    fn enforce_routing(&self, behaviors: &[BehaviorAttribute], metadata: &Metadata) -> Option<Failure> {
        behaviors.iter().find_map(|behavior| match behavior {
            BehaviorAttribute::Routing(RoutingAttribute::ClusterSingleton) => None,
            BehaviorAttribute::Routing(routing) => check_routing(routing, self.role.as_ref(), metadata).err(),
            _ => None,
        })
    }

    /// Acquires the `ClusterSingleton` advisory lock if the message
    /// type declares it, returning the handle to release after
    /// dispatch. Spec §9 leaves strictness under partitions open; this
    /// treats it as advisory mutual exclusion backed by the same lock
    /// primitive as `DistributedLock`, not a hard cluster-wide fencing
    /// guarantee — see DESIGN.md.
    async fn acquire_cluster_singleton(&self, behaviors: &[BehaviorAttribute], message_type: &str) -> Result<Option<LockHandle>, Failure> {
        let wants_singleton = behaviors
            .iter()
            .any(|b| matches!(b, BehaviorAttribute::Routing(RoutingAttribute::ClusterSingleton)));
        if !wants_singleton {
            return Ok(None);
        }
        let key = format!("catga:singleton:{message_type}");
        match self.lock.try_acquire(&key, self.cluster_singleton_lease, Duration::from_millis(50)).await {
            Ok(Some(handle)) => Ok(Some(handle)),
            Ok(None) => Err(Failure::new(ErrorCode::NotLeader, "another instance holds the cluster singleton lock")),
            Err(e) => Err(Failure::new(ErrorCode::LockFailed, e.to_string())),
        }
    }

    /// Spec §4.I `Send<TResp>(request) -> Result<TResp>`: resolves the
    /// single registered handler and runs it through the standard
    /// pipeline.
    pub async fn send<Req, Resp>(&self, request: Req, ctx: DispatchContext) -> CatgaResult<Resp>
    where
        Req: MessageAttributes + Clone + Send + Sync + 'static,
        Resp: Serialize + DeserializeOwned + Clone + Send + 'static,
    {
        let handler = match self.registry.resolve_request::<Req, Arc<dyn RequestHandler<Req, Resp>>>() {
            Resolution::NotFound => {
                return CatgaResult::failure(ErrorCode::HandlerNotFound, format!("no handler registered for {}", ctx.message_type))
            }
            Resolution::Ambiguous => {
                return CatgaResult::failure(ErrorCode::HandlerAmbiguous, format!("more than one handler registered for {}", ctx.message_type))
            }
            Resolution::Found(h) => h,
        };

        let behaviors = handler.behaviors();

        if let Some(failure) = self.enforce_routing(&behaviors, &ctx.metadata) {
            return CatgaResult::from_failure(failure);
        }

        let singleton_handle = match self.acquire_cluster_singleton(&behaviors, ctx.message_type).await {
            Ok(handle) => handle,
            Err(failure) => return CatgaResult::from_failure(failure),
        };

        let pipeline = self.pipeline_for(ctx.message_type, &behaviors);

        let validate_request = request.clone();
        let handler_for_validate = handler.clone();
        let handler_for_call = handler.clone();
        let ctx_ref = &ctx;
        let cancellation: CancellationToken = ctx.cancellation.clone();

        // The pipeline already rejects an already-cancelled context at
        // entry; racing the dispatch here additionally aborts the wait
        // if cancellation fires while the handler is in flight (spec §5
        // cancellation propagation chain).
        let result = tokio::select! {
            _ = cancellation.cancelled() => CatgaResult::failure(ErrorCode::Cancelled, "dispatch cancelled"),
            result = pipeline.dispatch(
                &ctx,
                move || handler_for_validate.validate(&validate_request),
                move || {
                    let handler = handler_for_call.clone();
                    let request = request.clone();
                    async move { handler.handle(request, ctx_ref).await }
                },
            ) => result,
        };

        if let Some(handle) = singleton_handle {
            if let Err(e) = self.lock.release(&handle).await {
                warn!(error = %e, "failed to release cluster singleton lock");
            }
        }

        result
    }

    /// Spec §4.I `Publish(event) -> Result`: concurrent fan-out to
    /// every registered handler; success iff all succeed, otherwise
    /// `Failure(PartialEventFailure)` with each handler's outcome
    /// recorded in metadata so a caller can see which subscribers
    /// failed without losing track of the ones that didn't.
    pub async fn publish<Evt>(&self, event: Evt, ctx: DispatchContext) -> CatgaResult<()>
    where
        Evt: MessageAttributes + Clone + Send + Sync + 'static,
    {
        if ctx.cancellation.is_cancelled() {
            return CatgaResult::failure(ErrorCode::Cancelled, "publish cancelled before dispatch began");
        }

        let handlers = self.registry.resolve_events::<Evt, Arc<dyn EventHandler<Evt>>>();
        if handlers.is_empty() {
            info!(message_type = ctx.message_type, "event published with no registered subscribers");
            return CatgaResult::success_empty();
        }

        // Each handler runs in its own task so a panicking handler is
        // isolated and cannot unwind the others' futures (mirrors
        // `catga_transport::in_process::publish`'s JoinHandle isolation).
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let behaviors = handler.behaviors();
            if let Some(failure) = self.enforce_routing(&behaviors, &ctx.metadata) {
                let name = handler.name();
                tasks.push(tokio::spawn(async move { (name, CatgaResult::<()>::from_failure(failure)) }));
                continue;
            }
            let pipeline = self.pipeline_for(&format!("{}.{}", ctx.message_type, handler.name()), &behaviors);
            let handler = handler.clone();
            let event = event.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let name = handler.name();
                let dispatch_ctx = ctx.clone();
                let outcome = pipeline
                    .dispatch(&dispatch_ctx, || Ok(()), move || {
                        let handler = handler.clone();
                        let event = event.clone();
                        let ctx = ctx.clone();
                        async move { handler.handle(event, &ctx).await }
                    })
                    .await;
                (name, outcome)
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(pair) => outcomes.push(pair),
                Err(e) => {
                    warn!(error = %e, "event handler task panicked");
                    outcomes.push(("handler", CatgaResult::<()>::failure(ErrorCode::HandlerFailed, format!("handler task panicked: {e}"))));
                }
            }
        }
        let failed: Vec<&str> = outcomes.iter().filter(|(_, r)| r.is_failure()).map(|(n, _)| *n).collect();
        if failed.is_empty() {
            return CatgaResult::success_empty();
        }

        let mut metadata = Metadata::new();
        for (name, outcome) in &outcomes {
            let rendered = match outcome {
                CatgaResult::Success { .. } => "ok".to_string(),
                CatgaResult::Failure(f) => format!("{}: {}", f.code, f.message),
            };
            metadata.insert(format!("handler.{name}"), rendered);
        }

        let mut failure = Failure::new(
            ErrorCode::PartialEventFailure,
            format!("{} of {} event handlers failed: {}", failed.len(), outcomes.len(), failed.join(", ")),
        );
        failure.metadata.merge(&metadata);
        CatgaResult::from_failure(failure)
    }
}
