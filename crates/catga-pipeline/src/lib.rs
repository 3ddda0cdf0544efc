//! Ordered behavior chain around a handler invocation (spec §4.H).

pub mod behavior;
pub mod context;
pub mod dispatch;
pub mod plan;

pub use behavior::{BehaviorCondition, BehaviorRegistry, CustomBehavior, NextFn};
pub use context::DispatchContext;
pub use dispatch::{Pipeline, PipelineDeps};
pub use plan::{expand_lock_key, PipelinePlan};
