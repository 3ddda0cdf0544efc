//! Attribute-driven descriptors (spec §3 "BehaviorDescriptor",
//! "HandlerDescriptor", §9 "Attributes on message classes -> descriptor
//! records"). Rust has no runtime attribute reflection, so the
//! registration-time pattern the teacher uses for pool/queue config
//! (plain structs built once, consulted at dispatch time — see
//! `fc-common::PoolConfig`) becomes our attribute substitute: message
//! types implement `MessageAttributes` to declare the same behaviors a
//! C#/Java attribute would, and the mediator extracts them once at
//! registration into a `BehaviorPlan` attached to the handler
//! descriptor.

use std::time::Duration;

/// Handler lifetime scope (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// A new handler instance per dispatch.
    Transient,
    /// One instance per logical request, threaded through the pipeline.
    Scoped,
    /// One instance for the process lifetime.
    Singleton,
}

/// Routing attribute a request or event type can declare (spec §4.I).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAttribute {
    /// Event is published to all nodes, not load-balanced across a
    /// queue group.
    Broadcast,
    /// Request executes only on the current leader node.
    LeaderOnly,
    /// Route to the node owning `hash(key_expr) mod shard_count`.
    Sharded { key_expr: String },
    /// At most one active handler instance across the cluster.
    ClusterSingleton,
}

/// Declarative behavior attached to a message type (spec §3
/// "Attribute-driven: Retry, Timeout, CircuitBreaker, Idempotent,
/// DistributedLock(key), Broadcast, LeaderOnly, Sharded(key),
/// ClusterSingleton").
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorAttribute {
    Retry { max_attempts: u32 },
    Timeout { duration: Duration },
    CircuitBreaker { breaker_name: String },
    Idempotent,
    DistributedLock { key_template: String },
    Routing(RoutingAttribute),
}

/// Extracted once per message type at registration and attached to the
/// `HandlerDescriptor` (spec §9). Implement this on request/event
/// types that need non-default behavior; the default is "no attached
/// behaviors", matching plain CQRS messages in the teacher's handler
/// registration style.
pub trait MessageAttributes {
    fn behaviors() -> Vec<BehaviorAttribute> {
        Vec::new()
    }
}

/// `(order, condition name, description)` tuple materialized once per
/// `(messageType, handlerType)` pair and cached by the pipeline builder
/// (spec §3 "BehaviorDescriptor"). `condition` is an opaque predicate
/// name rather than a closure so descriptors stay `Clone + Debug`; the
/// pipeline builder resolves named conditions against the dispatch
/// context.
#[derive(Debug, Clone)]
pub struct BehaviorDescriptor {
    pub order: i32,
    pub name: &'static str,
    pub condition: Option<&'static str>,
}

impl BehaviorDescriptor {
    pub fn new(order: i32, name: &'static str) -> Self {
        Self { order, name, condition: None }
    }

    pub fn with_condition(mut self, condition: &'static str) -> Self {
        self.condition = Some(condition);
        self
    }
}
