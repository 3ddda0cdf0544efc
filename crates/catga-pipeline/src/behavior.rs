//! Extension point for `registerBehavior` (spec §4.I "Handler
//! registration": `registerBehavior(behaviorFactory, order, condition?)`).
//! A custom behavior wraps a call the same way the canonical stages do
//! — `async (message, next) -> Result` — but is supplied by the caller
//! instead of being one of the seven standard stages in
//! `dispatch.rs`. Operates on serialized bytes so it stays object-safe
//! across `Pipeline::dispatch`'s generic `T`, the same representation
//! the idempotency stage already uses to cache `T` as `Vec<u8>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use catga_core::{BehaviorDescriptor, CatgaResult, Metadata};
use futures::future::BoxFuture;

pub type NextFn<'a> = Box<dyn FnOnce() -> BoxFuture<'a, CatgaResult<Vec<u8>>> + Send + 'a>;

#[async_trait]
pub trait CustomBehavior: Send + Sync {
    async fn invoke(&self, metadata: &Metadata, next: NextFn<'_>) -> CatgaResult<Vec<u8>>;
}

/// A named predicate a `BehaviorDescriptor.condition` resolves against
/// (spec §3 "condition" is an opaque predicate name, not a closure, so
/// descriptors stay `Clone + Debug`).
pub trait BehaviorCondition: Send + Sync {
    fn evaluate(&self, metadata: &Metadata) -> bool;
}

#[derive(Clone)]
struct BehaviorRegistration {
    descriptor: BehaviorDescriptor,
    behavior: Arc<dyn CustomBehavior>,
}

/// Caller-extensible registry of behaviors installed alongside the
/// seven canonical ones, consumed by `Pipeline` (spec §4.I
/// `registerBehavior(behaviorFactory, order, condition?)`).
/// Registration is write-only after startup, matching spec §4.I.
#[derive(Default, Clone)]
pub struct BehaviorRegistry {
    behaviors: Vec<BehaviorRegistration>,
    conditions: HashMap<&'static str, Arc<dyn BehaviorCondition>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom behavior at `descriptor.order`. Applicable
    /// behaviors run in ascending order, inside-out around the handler
    /// (spec §3 "BehaviorDescriptor"); ties keep registration order.
    pub fn register_behavior(&mut self, descriptor: BehaviorDescriptor, behavior: Arc<dyn CustomBehavior>) {
        self.behaviors.push(BehaviorRegistration { descriptor, behavior });
        self.behaviors.sort_by_key(|r| r.descriptor.order);
    }

    /// Registers the predicate a descriptor's `condition` name resolves
    /// to at dispatch time.
    pub fn register_condition(&mut self, name: &'static str, condition: Arc<dyn BehaviorCondition>) {
        self.conditions.insert(name, condition);
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Behaviors whose `condition` (if any) resolves true against
    /// `metadata`, in ascending-order application order.
    pub(crate) fn applicable(&self, metadata: &Metadata) -> Vec<Arc<dyn CustomBehavior>> {
        self.behaviors
            .iter()
            .filter(|r| match r.descriptor.condition {
                Some(name) => self.conditions.get(name).is_some_and(|c| c.evaluate(metadata)),
                None => true,
            })
            .map(|r| r.behavior.clone())
            .collect()
    }
}
