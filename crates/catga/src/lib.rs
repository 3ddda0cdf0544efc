//! Catga: a distributed CQRS mediator, reliability plane, and durable
//! flow engine, assembled from the `catga-*` component crates. Grounded
//! on `fc-router`'s facade `lib.rs`, which re-exports its subsystem
//! crates' public types under one namespace rather than wrapping them;
//! this crate does the same, one module per component.
//!
//! - [`core`] — message/result/error vocabulary every other module builds on.
//! - [`mediator`] — typed request/response dispatch and event fan-out.
//! - [`pipeline`] — the behavior/interceptor chain the mediator runs through.
//! - [`resilience`] — timeout → retry → bulkhead → circuit breaker.
//! - [`outbox`] / [`idempotency`] — at-least-once publish and inbox dedup.
//! - [`lock`] — distributed mutual exclusion with fencing tokens.
//! - [`transport`] — publish / send-and-receive / subscribe over a wire.
//! - [`id`] — Snowflake-style distributed ID generation.
//! - [`eventstore`] — append-only streams with optimistic concurrency.
//! - [`saga`] — sequential steps with reverse compensation.
//! - [`flow`] — the durable workflow interpreter.
//! - [`dlq`] — terminal storage for messages that exhaust their retry budget.
//! - [`config`] — TOML + environment-variable configuration.
//! - [`serde`] — the abstract serializer contract and its reference codecs.

pub use catga_core as core;
pub use catga_config as config;
pub use catga_dlq as dlq;
pub use catga_eventstore as eventstore;
pub use catga_flow as flow;
pub use catga_idempotency as idempotency;
pub use catga_lock as lock;
pub use catga_mediator as mediator;
pub use catga_outbox as outbox;
pub use catga_pipeline as pipeline;
pub use catga_resilience as resilience;
pub use catga_saga as saga;
pub use catga_serde as serde;
pub use catga_id as id;
pub use catga_transport as transport;

/// The handful of types almost every caller reaches for immediately:
/// the request/event vocabulary, the error code set, and the result
/// type every handler returns.
pub mod prelude {
    pub use catga_core::{CatgaResult, CorrelationId, ErrorCode, Event, EventEnvelope, Failure, MessageId, Metadata, Request, RequestEnvelope};
    pub use catga_mediator::{EventHandler, Mediator, RequestHandler};
}
