//! Durable workflow interpreter over a tree of `Sequence`/`Step`/`If`/
//! `Switch`/`ForEach`/`WhenAll`/`WhenAny`/`Wait`/`Delay`/`Compensate`
//! nodes (spec §4.L), persisted through the store-parity contract in
//! `store`/`memory`/`redis_store`/`nats_store` (spec §4.M).

mod engine;
mod memory;
mod nats_store;
mod node;
mod redis_store;
mod snapshot;
mod store;

pub use engine::{FlowEngine, FlowEngineError};
pub use memory::{foreach_item_key, InMemoryFlowStore};
pub use nats_store::NatsKvFlowStore;
pub use node::{FlowAction, FlowCondition, FlowNode, FlowSelector, ForEachItemAction, ForEachOptions, ItemsSelector};
pub use redis_store::RedisFlowStore;
pub use snapshot::{path_key, FlowSnapshot, FlowStatus, ForEachProgress, Position, WaitCondition, WaitKind};
pub use store::{FlowStore, FlowStoreError};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use catga_core::CatgaResult;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use super::*;

    #[derive(Default, Serialize, Deserialize)]
    struct OrderFlowState {
        order_id: String,
        shipped: bool,
        doubled: Vec<i64>,
    }

    struct MarkShipped;
    #[async_trait]
    impl FlowAction<OrderFlowState> for MarkShipped {
        fn name(&self) -> &str {
            "mark_shipped"
        }
        async fn run(&self, ctx: &mut OrderFlowState) -> CatgaResult<()> {
            ctx.shipped = true;
            CatgaResult::success_empty()
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl FlowAction<OrderFlowState> for AlwaysFail {
        fn name(&self) -> &str {
            "always_fail"
        }
        async fn run(&self, _ctx: &mut OrderFlowState) -> CatgaResult<()> {
            CatgaResult::failure(catga_core::ErrorCode::HandlerFailed, "boom")
        }
    }

    #[tokio::test]
    async fn sequence_of_steps_runs_to_completion() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let root = FlowNode::Sequence(vec![FlowNode::Step(Arc::new(MarkShipped))]);
        let engine = FlowEngine::new(store, root);
        let snapshot = engine.start("order-1", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Succeeded);
        let ctx: OrderFlowState = serde_json::from_slice(&snapshot.state_bytes).unwrap();
        assert!(ctx.shipped);
    }

    #[tokio::test]
    async fn failing_step_fails_the_flow() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let root = FlowNode::Sequence(vec![FlowNode::Step(Arc::new(AlwaysFail))]);
        let engine = FlowEngine::new(store, root);
        let snapshot = engine.start("order-2", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Failed);
    }

    #[tokio::test]
    async fn rerunning_a_terminal_flow_is_a_no_op() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let root = FlowNode::Sequence(vec![FlowNode::Step(Arc::new(MarkShipped))]);
        let engine = FlowEngine::new(store, root);
        let first = engine.start("order-3", &OrderFlowState::default()).await.unwrap();
        let second = engine.run("order-3").await.unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(second.status, FlowStatus::Succeeded);
    }

    struct DoubleItems;
    impl ItemsSelector<OrderFlowState> for DoubleItems {
        fn items(&self, _ctx: &OrderFlowState) -> Vec<Value> {
            (1..=10i64).map(Value::from).collect()
        }
    }

    struct DoubleBody {
        fail_index: usize,
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl ForEachItemAction<OrderFlowState> for DoubleBody {
        async fn run_item(&self, _ctx: &mut OrderFlowState, item: &Value, index: usize) -> CatgaResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if index == self.fail_index {
                return CatgaResult::failure(catga_core::ErrorCode::HandlerFailed, "injected failure");
            }
            let n = item.as_i64().unwrap();
            CatgaResult::success(Value::from(n * 2))
        }
    }

    #[tokio::test]
    async fn foreach_collects_partial_failure_without_losing_successes() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let root = FlowNode::Sequence(vec![FlowNode::ForEach {
            items: Arc::new(DoubleItems),
            body: Arc::new(DoubleBody { fail_index: 3, calls: calls.clone() }),
            options: ForEachOptions { parallel: true, max_concurrency: 4, fail_fast: false },
        }]);
        let engine = FlowEngine::new(store.clone(), root);
        let snapshot = engine.start("order-4", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        let progress = store.get_foreach_progress("order-4", "0").await.unwrap().unwrap();
        assert_eq!(progress.completed.len(), 9);
        assert!(progress.failed.contains_key(&3));
        assert_eq!(progress.results.get(&0).map(|b| serde_json::from_slice::<i64>(b).unwrap()), Some(2));

        // Rerunning a terminal (Failed) flow is a no-op, same as the success path.
        let rerun = engine.run("order-4").await.unwrap();
        assert_eq!(rerun.version, snapshot.version);
    }

    #[tokio::test]
    async fn wait_all_suspends_until_every_signal_arrives_regardless_of_order() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let mut keys = std::collections::BTreeSet::new();
        keys.insert("inventory".to_string());
        keys.insert("payment".to_string());
        let root = FlowNode::Sequence(vec![
            FlowNode::Wait { signal_keys: keys, kind: WaitKind::All, timeout: None, on_timeout: None },
            FlowNode::Step(Arc::new(MarkShipped)),
        ]);
        let engine = FlowEngine::new(store.clone(), root);
        let snapshot = engine.start("order-5", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::WaitingSignal);

        let after_payment = engine.signal("order-5", "payment", b"ok".to_vec()).await.unwrap();
        assert_eq!(after_payment.status, FlowStatus::WaitingSignal);

        let after_inventory = engine.signal("order-5", "inventory", b"ok".to_vec()).await.unwrap();
        assert_eq!(after_inventory.status, FlowStatus::Succeeded);
    }

    #[tokio::test]
    async fn wait_with_timeout_and_no_fallback_fails_on_sweep() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let mut keys = std::collections::BTreeSet::new();
        keys.insert("approval".to_string());
        let root = FlowNode::Sequence(vec![FlowNode::Wait { signal_keys: keys, kind: WaitKind::All, timeout: Some(Duration::from_millis(1)), on_timeout: None }]);
        let engine = FlowEngine::new(store.clone(), root);
        let snapshot = engine.start("order-6", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::WaitingSignal);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let advanced = engine.sweep_timeouts().await.unwrap();
        assert_eq!(advanced, vec!["order-6".to_string()]);

        let final_snapshot = store.get("order-6").await.unwrap().unwrap();
        assert_eq!(final_snapshot.status, FlowStatus::Failed);
    }

    #[tokio::test]
    async fn compensate_runs_handler_on_body_failure_and_resolves_successfully() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let compensated = Arc::new(AtomicUsize::new(0));

        struct RecordCompensation(Arc<AtomicUsize>);
        #[async_trait]
        impl FlowAction<OrderFlowState> for RecordCompensation {
            fn name(&self) -> &str {
                "record_compensation"
            }
            async fn run(&self, _ctx: &mut OrderFlowState) -> CatgaResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                CatgaResult::success_empty()
            }
        }

        let root = FlowNode::Sequence(vec![FlowNode::Compensate { body: Box::new(FlowNode::Step(Arc::new(AlwaysFail))), handler: Arc::new(RecordCompensation(compensated.clone())) }]);
        let engine = FlowEngine::new(store, root);
        let snapshot = engine.start("order-7", &OrderFlowState::default()).await.unwrap();
        // A clean compensation resolves the flow rather than leaving it
        // failed (spec §4.L `Compensating -> Succeeded`).
        assert_eq!(snapshot.status, FlowStatus::Succeeded);
        assert_eq!(compensated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compensate_still_fails_when_the_handler_itself_fails() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());

        struct FailingCompensation;
        #[async_trait]
        impl FlowAction<OrderFlowState> for FailingCompensation {
            fn name(&self) -> &str {
                "failing_compensation"
            }
            async fn run(&self, _ctx: &mut OrderFlowState) -> CatgaResult<()> {
                CatgaResult::failure(catga_core::ErrorCode::HandlerFailed, "compensation also failed")
            }
        }

        let root = FlowNode::Sequence(vec![FlowNode::Compensate { body: Box::new(FlowNode::Step(Arc::new(AlwaysFail))), handler: Arc::new(FailingCompensation) }]);
        let engine = FlowEngine::new(store, root);
        let snapshot = engine.start("order-8", &OrderFlowState::default()).await.unwrap();
        assert_eq!(snapshot.status, FlowStatus::Failed);
    }

    #[tokio::test]
    async fn recover_resumes_non_terminal_flows() {
        let store: Arc<dyn FlowStore> = Arc::new(InMemoryFlowStore::new());
        let mut keys = std::collections::BTreeSet::new();
        keys.insert("go".to_string());
        let root = FlowNode::Sequence(vec![
            FlowNode::Wait { signal_keys: keys, kind: WaitKind::Any, timeout: None, on_timeout: None },
            FlowNode::Step(Arc::new(MarkShipped)),
        ]);
        let engine = FlowEngine::new(store.clone(), root);
        engine.start("order-8", &OrderFlowState::default()).await.unwrap();
        store.update_wait_condition({
            let mut c = store.get_wait_condition("order-8").await.unwrap().unwrap();
            c.received.insert("go".to_string(), vec![]);
            c
        }).await.unwrap();

        let resumed = engine.recover().await.unwrap();
        assert_eq!(resumed, vec!["order-8".to_string()]);
        let snapshot = store.get("order-8").await.unwrap().unwrap();
        assert_eq!(snapshot.status, FlowStatus::Succeeded);
    }
}
