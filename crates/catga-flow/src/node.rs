//! The flow tree (spec §4.L): `Sequence`, `Step`, `If`, `Switch`,
//! `ForEach`, `WhenAll`, `WhenAny`, `Wait`, `Delay`, `Compensate`.
//! The tree itself is defined in Rust (like `catga-saga`'s step list);
//! only the runtime position/state is persisted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catga_core::CatgaResult;
use serde_json::Value;

use crate::snapshot::WaitKind;

#[async_trait]
pub trait FlowAction<Ctx: Send>: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &mut Ctx) -> CatgaResult<()>;
}

pub trait FlowCondition<Ctx>: Send + Sync {
    fn evaluate(&self, ctx: &Ctx) -> bool;
}

pub trait FlowSelector<Ctx>: Send + Sync {
    fn select(&self, ctx: &Ctx) -> String;
}

pub trait ItemsSelector<Ctx>: Send + Sync {
    fn items(&self, ctx: &Ctx) -> Vec<Value>;
}

#[async_trait]
pub trait ForEachItemAction<Ctx: Send>: Send + Sync {
    async fn run_item(&self, ctx: &mut Ctx, item: &Value, index: usize) -> CatgaResult<Value>;
}

pub struct ForEachOptions {
    pub parallel: bool,
    pub max_concurrency: usize,
    pub fail_fast: bool,
}

impl Default for ForEachOptions {
    fn default() -> Self {
        Self { parallel: true, max_concurrency: 4, fail_fast: false }
    }
}

pub enum FlowNode<Ctx: Send> {
    Sequence(Vec<FlowNode<Ctx>>),
    Step(Arc<dyn FlowAction<Ctx>>),
    If(Arc<dyn FlowCondition<Ctx>>, Box<FlowNode<Ctx>>, Option<Box<FlowNode<Ctx>>>),
    Switch(Arc<dyn FlowSelector<Ctx>>, Vec<(String, FlowNode<Ctx>)>, Option<Box<FlowNode<Ctx>>>),
    ForEach { items: Arc<dyn ItemsSelector<Ctx>>, body: Arc<dyn ForEachItemAction<Ctx>>, options: ForEachOptions },
    WhenAll(Vec<FlowNode<Ctx>>),
    WhenAny(Vec<FlowNode<Ctx>>),
    Wait { signal_keys: BTreeSet<String>, kind: WaitKind, timeout: Option<Duration>, on_timeout: Option<Box<FlowNode<Ctx>>> },
    Delay(Duration),
    Compensate { body: Box<FlowNode<Ctx>>, handler: Arc<dyn FlowAction<Ctx>> },
}
