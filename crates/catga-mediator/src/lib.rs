//! Handler resolution, dispatch, response correlation and event
//! fan-out (spec §4.I), grounded on `fc-router::manager::QueueManager`.

pub mod handler;
pub mod mediator;
pub mod registry;
pub mod routing;

pub use handler::{EventHandler, RequestHandler};
pub use mediator::{Mediator, MediatorDeps};
pub use registry::{HandlerRegistry, Resolution, SharedRegistry};
pub use routing::{shard_for, ClusterRole, StaticClusterRole};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catga_core::{BehaviorAttribute, CatgaResult, MessageAttributes};
    use catga_idempotency::IdempotencyStore;
    use catga_lock::InMemoryLock;
    use catga_outbox::InMemoryOutboxStore;
    use catga_pipeline::DispatchContext;
    use catga_serde::JsonSerializer;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct CreateOrder {
        order_id: String,
    }
    impl MessageAttributes for CreateOrder {}

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderCreated {
        order_id: String,
    }

    struct CreateOrderHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RequestHandler<CreateOrder, OrderCreated> for CreateOrderHandler {
        async fn handle(&self, request: CreateOrder, _ctx: &DispatchContext) -> CatgaResult<OrderCreated> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CatgaResult::success(OrderCreated { order_id: request.order_id })
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OrderPlaced {
        order_id: String,
    }
    impl MessageAttributes for OrderPlaced {}

    struct CountingEventHandler {
        name: &'static str,
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<OrderPlaced> for CountingEventHandler {
        async fn handle(&self, _event: OrderPlaced, _ctx: &DispatchContext) -> CatgaResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                CatgaResult::failure(catga_core::ErrorCode::HandlerFailed, "boom")
            } else {
                CatgaResult::success_empty()
            }
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn test_mediator() -> Mediator<JsonSerializer> {
        Mediator::solo(Arc::new(IdempotencyStore::with_defaults()), Arc::new(InMemoryLock::new()), Some(Arc::new(InMemoryOutboxStore::new())), JsonSerializer)
    }

    #[tokio::test]
    async fn send_resolves_the_registered_handler() {
        let mediator = test_mediator();
        let calls = Arc::new(AtomicU32::new(0));
        mediator.register_request::<CreateOrder, OrderCreated, _>(CreateOrderHandler { calls: calls.clone() });

        let ctx = DispatchContext::new("M1", "CreateOrder");
        let result = mediator.send::<CreateOrder, OrderCreated>(CreateOrder { order_id: "O1".into() }, ctx).await;

        assert!(result.is_success());
        assert_eq!(result.value(), Some(&OrderCreated { order_id: "O1".into() }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_without_a_registered_handler_fails_with_handler_not_found() {
        let mediator = test_mediator();
        let ctx = DispatchContext::new("M2", "CreateOrder");
        let result = mediator.send::<CreateOrder, OrderCreated>(CreateOrder { order_id: "O2".into() }, ctx).await;
        assert_eq!(result.error_code(), Some(catga_core::ErrorCode::HandlerNotFound));
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_event_handler() {
        let mediator = test_mediator();
        let calls_a = Arc::new(AtomicU32::new(0));
        let calls_b = Arc::new(AtomicU32::new(0));
        mediator.register_event::<OrderPlaced, _>(CountingEventHandler { name: "a", calls: calls_a.clone(), fail: false });
        mediator.register_event::<OrderPlaced, _>(CountingEventHandler { name: "b", calls: calls_b.clone(), fail: false });

        let ctx = DispatchContext::new("M3", "OrderPlaced");
        let result = mediator.publish(OrderPlaced { order_id: "O1".into() }, ctx).await;

        assert!(result.is_success());
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_reports_partial_event_failure_without_losing_successful_handlers() {
        let mediator = test_mediator();
        let calls_ok = Arc::new(AtomicU32::new(0));
        let calls_fail = Arc::new(AtomicU32::new(0));
        mediator.register_event::<OrderPlaced, _>(CountingEventHandler { name: "ok", calls: calls_ok.clone(), fail: false });
        mediator.register_event::<OrderPlaced, _>(CountingEventHandler { name: "broken", calls: calls_fail.clone(), fail: true });

        let ctx = DispatchContext::new("M4", "OrderPlaced");
        let result = mediator.publish(OrderPlaced { order_id: "O1".into() }, ctx).await;

        assert_eq!(result.error_code(), Some(catga_core::ErrorCode::PartialEventFailure));
        assert_eq!(calls_ok.load(Ordering::SeqCst), 1);
        assert_eq!(calls_fail.load(Ordering::SeqCst), 1);
        let meta = result.metadata().unwrap();
        assert_eq!(meta.get("handler.ok"), Some("ok"));
        assert!(meta.get("handler.broken").unwrap().contains("HandlerFailed"));
    }

    #[tokio::test]
    async fn publish_with_no_handlers_is_a_silent_success() {
        let mediator = test_mediator();
        let ctx = DispatchContext::new("M5", "OrderPlaced");
        let result = mediator.publish(OrderPlaced { order_id: "O1".into() }, ctx).await;
        assert!(result.is_success());
    }

    #[test]
    fn behavior_attribute_routing_variant_is_reachable() {
        let attrs = vec![BehaviorAttribute::Routing(catga_core::RoutingAttribute::LeaderOnly)];
        assert_eq!(attrs.len(), 1);
    }

    struct StampBehavior(Arc<AtomicU32>);
    #[async_trait]
    impl catga_pipeline::CustomBehavior for StampBehavior {
        async fn invoke(&self, _metadata: &catga_core::Metadata, next: catga_pipeline::NextFn<'_>) -> CatgaResult<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next().await
        }
    }

    #[tokio::test]
    async fn registered_behavior_runs_around_every_dispatch() {
        let mediator = test_mediator();
        let invocations = Arc::new(AtomicU32::new(0));
        mediator.register_behavior(catga_core::BehaviorDescriptor::new(50, "stamp"), Arc::new(StampBehavior(invocations.clone())));

        let calls = Arc::new(AtomicU32::new(0));
        mediator.register_request::<CreateOrder, OrderCreated, _>(CreateOrderHandler { calls: calls.clone() });

        let ctx = DispatchContext::new("M6", "CreateOrder");
        let result = mediator.send::<CreateOrder, OrderCreated>(CreateOrder { order_id: "O1".into() }, ctx).await;

        assert!(result.is_success());
        assert_eq!(result.value(), Some(&OrderCreated { order_id: "O1".into() }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
