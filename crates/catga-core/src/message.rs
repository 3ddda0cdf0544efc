//! Message shapes from spec §3: every dispatch carries a `MessageId`
//! and optional `CorrelationId`; a `Request` expects exactly one typed
//! response, an `Event` has zero or more subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit monotonic id, normally minted by `catga-id`'s Snowflake
/// generator. Newtype so handler code can't accidentally compare it to
/// an unrelated `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Links a causal chain of messages (a command, the events it raises,
/// the commands those events trigger, ...). Unlike `MessageId` this is
/// caller-supplied and opaque, so it's a string rather than a Snowflake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        CorrelationId(s.to_string())
    }
}

/// Implemented by command/query types that expect exactly one typed
/// response. The mediator resolves a single handler keyed on
/// `(TypeId::of::<Self>(), TypeId::of::<Self::Response>())`.
pub trait Request: Send + Sync + 'static {
    type Response: Send + Sync + 'static;

    /// Fully-qualified type name used as the transport subject suffix
    /// (spec §6: `catga.request.<typeFqn>`) and as the dead-letter
    /// record's `type` field. Defaults to `std::any::type_name`, which
    /// is stable enough within one build but not across Rust versions —
    /// override it for wire compatibility guarantees.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Implemented by notification types with zero or more subscribers.
pub trait Event: Send + Sync + Clone + 'static {
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Envelope wrapping a request body with dispatch metadata (spec §3
/// "Message (base)").
#[derive(Debug, Clone)]
pub struct RequestEnvelope<T> {
    pub id: MessageId,
    pub correlation_id: Option<CorrelationId>,
    pub created_at: DateTime<Utc>,
    pub body: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(id: MessageId, body: T) -> Self {
        Self { id, correlation_id: None, created_at: Utc::now(), body }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Envelope wrapping an event body; carries `OccurredAt` distinct from
/// `CreatedAt` per spec §3 (an event may describe something that
/// happened earlier than the envelope was constructed).
#[derive(Debug, Clone)]
pub struct EventEnvelope<T> {
    pub id: MessageId,
    pub correlation_id: Option<CorrelationId>,
    pub created_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub body: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(id: MessageId, body: T) -> Self {
        let now = Utc::now();
        Self { id, correlation_id: None, created_at: now, occurred_at: now, body }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}
