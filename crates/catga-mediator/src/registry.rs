//! Type-keyed handler registry (spec §9 "dynamic handler dispatch ->
//! static dispatch table"), grounded on `fc-router::manager`'s
//! `QueueManager` central orchestrator — a frozen-after-startup map
//! from message type to handler. Since Rust has no runtime generic
//! reflection, handlers are registered as `Box<dyn Any>` behind a
//! `TypeId` key and downcast back to their concrete trait object at
//! the call site, where the caller already knows the concrete types.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

/// Registrations live in a process-wide registry constructed at
/// startup (spec §9 "global registration state ... frozen
/// thereafter; lookups are lock-free" — `dashmap` gives us concurrent,
/// effectively lock-free reads once registration has settled).
#[derive(Default)]
pub struct HandlerRegistry {
    requests: DashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>,
    events: DashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>,
}

pub enum Resolution<T> {
    Found(T),
    NotFound,
    Ambiguous,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_request<Req: 'static, H: Any + Send + Sync + 'static>(&self, handler: H) {
        self.requests.entry(TypeId::of::<Req>()).or_default().push(Box::new(handler));
    }

    pub fn resolve_request<Req: 'static, H: Clone + 'static>(&self) -> Resolution<H> {
        match self.requests.get(&TypeId::of::<Req>()) {
            None => Resolution::NotFound,
            Some(handlers) if handlers.is_empty() => Resolution::NotFound,
            Some(handlers) if handlers.len() > 1 => Resolution::Ambiguous,
            Some(handlers) => match handlers[0].downcast_ref::<H>() {
                Some(h) => Resolution::Found(h.clone()),
                None => Resolution::NotFound,
            },
        }
    }

    pub fn register_event<Evt: 'static, H: Any + Send + Sync + 'static>(&self, handler: H) {
        self.events.entry(TypeId::of::<Evt>()).or_default().push(Box::new(handler));
    }

    pub fn resolve_events<Evt: 'static, H: Clone + 'static>(&self) -> Vec<H> {
        match self.events.get(&TypeId::of::<Evt>()) {
            None => Vec::new(),
            Some(handlers) => handlers.iter().filter_map(|h| h.downcast_ref::<H>().cloned()).collect(),
        }
    }
}

pub type SharedRegistry = Arc<HandlerRegistry>;
