//! Transport abstraction (spec §4.G): `Publish`, `SendAndReceive`,
//! `Subscribe` over a subject + optional queue-group, generalized from
//! the teacher's `fc-queue::{QueueConsumer, QueuePublisher}` traits
//! (which are bytes-in/bytes-out over a single queue) to also cover
//! pub/sub fan-out and request/reply correlation.
//!
//! Rust trait objects can't carry generic methods, so `Transport` is
//! byte-oriented like the teacher's queue traits; typed `Publish<T>`/
//! `SendAndReceive<Req,Resp>` at the call site (mediator, outbox
//! publisher) serialize with `catga-serde` before calling in here.

pub mod in_process;
pub mod nats;
pub mod redis_streams;
pub mod subjects;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no subscriber for subject {0}")]
    NoSubscriber(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport backend error: {0}")]
    Backend(String),
}

impl From<TransportError> for catga_core::ErrorCode {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(_) => catga_core::ErrorCode::Timeout,
            TransportError::NoSubscriber(_) | TransportError::Backend(_) => catga_core::ErrorCode::TransportFailed,
        }
    }
}

/// spec §6: headers carry `catga.message_id`, `catga.correlation_id`,
/// `catga.message_type`, `traceparent`, `tracestate`,
/// `catga.trace_baggage`.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
    pub trace_parent: Option<String>,
    pub trace_state: Option<String>,
    /// Caller-supplied key-value baggage carried across the wire
    /// alongside the W3C trace headers (spec §6 `catga.trace_baggage`),
    /// rendered as `key=value` pairs joined by `,` per the W3C Baggage
    /// spec's wire format.
    pub trace_baggage: IndexMap<String, String>,
    pub headers: IndexMap<String, String>,
}

impl TransportContext {
    pub fn new(message_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: None,
            message_type: message_type.into(),
            sent_at: Utc::now(),
            trace_parent: None,
            trace_state: None,
            trace_baggage: IndexMap::new(),
            headers: IndexMap::new(),
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.trace_baggage.insert(key.into(), value.into());
        self
    }

    /// Renders the spec §6 wire headers for subject-based backends.
    pub fn to_wire_headers(&self) -> IndexMap<String, String> {
        let mut headers = self.headers.clone();
        headers.insert("catga.message_id".into(), self.message_id.clone());
        if let Some(cid) = &self.correlation_id {
            headers.insert("catga.correlation_id".into(), cid.clone());
        }
        headers.insert("catga.message_type".into(), self.message_type.clone());
        if let Some(tp) = &self.trace_parent {
            headers.insert("traceparent".into(), tp.clone());
        }
        if let Some(ts) = &self.trace_state {
            headers.insert("tracestate".into(), ts.clone());
        }
        if !self.trace_baggage.is_empty() {
            let rendered = self.trace_baggage.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
            headers.insert("catga.trace_baggage".into(), rendered);
        }
        headers
    }
}

/// Delivery callback for `Subscribe`. Returns `Some(bytes)` when the
/// subject is used for request/reply (the response body); `None` for
/// fire-and-forget events.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Vec<u8>, ctx: TransportContext) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct SubscriptionHandle {
    pub subject: String,
    pub queue_group: Option<String>,
}

pub use in_process::InProcessTransport;
pub use nats::NatsTransport;
pub use redis_streams::RedisStreamsTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget to all subscribers of `subject` (spec §4.G
    /// `Publish<T>`).
    async fn publish(&self, subject: &str, payload: Vec<u8>, ctx: TransportContext) -> Result<(), TransportError>;

    /// Request/reply (spec §4.G `SendAndReceive<Req,Resp>`).
    async fn send_and_receive(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ctx: TransportContext,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Registers `handler` for `subject`. When `queue_group` is set,
    /// exactly one consumer in the group receives each message (spec
    /// §4.G load balancing).
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: std::sync::Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, TransportError>;
}
