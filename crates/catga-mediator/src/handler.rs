//! Handler contracts (spec §4.I). Distinct from `catga_pipeline`'s
//! `Pipeline::dispatch`, which only knows how to run *a* handler
//! closure — these traits are what gets registered with the mediator
//! and carry the declarative attributes the pipeline plan is built
//! from (spec §3 `MessageAttributes`).

use async_trait::async_trait;
use catga_core::{BehaviorAttribute, CatgaResult};
use catga_pipeline::DispatchContext;

/// A single handler for a request/response pair. Exactly one must be
/// registered per `Req` type (spec §4.I "exactly one handler"); a
/// second registration makes later dispatch resolve to
/// `HandlerAmbiguous` rather than silently picking one.
#[async_trait]
pub trait RequestHandler<Req, Resp>: Send + Sync {
    async fn handle(&self, request: Req, ctx: &DispatchContext) -> CatgaResult<Resp>;

    /// Validation stage (spec §4.H stage 5). Default accepts everything.
    fn validate(&self, _request: &Req) -> Result<(), String> {
        Ok(())
    }

    /// Declarative behaviors this handler's message type carries (spec
    /// §3 "Attribute-driven"). Default is a plain, unadorned handler.
    fn behaviors(&self) -> Vec<BehaviorAttribute> {
        Vec::new()
    }
}

/// One of possibly many subscribers for an event type (spec §4.I
/// "Publish ... 0..N handlers"). Unlike requests, zero registered
/// handlers is a valid, silent no-op — nobody happened to be
/// listening.
#[async_trait]
pub trait EventHandler<Evt>: Send + Sync {
    async fn handle(&self, event: Evt, ctx: &DispatchContext) -> CatgaResult<()>;

    /// Stable name used to label this handler's outcome in
    /// `PartialEventFailure` metadata (spec §4.I).
    fn name(&self) -> &'static str;

    fn behaviors(&self) -> Vec<BehaviorAttribute> {
        Vec::new()
    }
}
