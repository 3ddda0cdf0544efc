//! Append-only per-stream event log with optimistic concurrency and
//! periodic snapshots (spec §4.J), plus the projection checkpoint
//! store (spec §4.O) kept here as a module rather than its own crate —
//! both are "cursor over an event stream" concerns, the same way the
//! teacher's `fc-stream` groups checkpoint/projection/watcher in one
//! crate. Grounded on `fc-outbox::repository`'s multi-backend trait
//! shape: one trait, several interchangeable implementations behind it.

pub mod checkpoint;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use catga_core::Metadata;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict { stream_id: String, expected: i64, actual: i64 },
}

impl From<EventStoreError> for catga_core::ErrorCode {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::Persistence(_) => catga_core::ErrorCode::PersistenceFailed,
            EventStoreError::ConcurrencyConflict { .. } => catga_core::ErrorCode::ConcurrencyConflict,
        }
    }
}

/// Caller-supplied event pending assignment of `sequence`/`timestamp`
/// (spec §3 `EventEnvelope`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { event_type: event_type.into(), payload, metadata: Metadata::new() }
    }
}

/// spec §3 `EventEnvelope`: `{sequence, type, payload, metadata, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub sequence: i64,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

/// spec §3 `Snapshot`: an optional checkpoint keyed by stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub stream_id: String,
    pub version: i64,
    pub state_bytes: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

/// spec §4.J. `expected_version == -1` means "the stream must not
/// exist yet" (spec §3 `EventStream` invariant).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically appends `events` to `stream_id`, assigning dense
    /// strictly-increasing `sequence` numbers continuing from the
    /// stream's current version. Rejects with `ConcurrencyConflict` if
    /// the stream's current version doesn't match `expected_version`.
    /// Returns the stream's new version.
    async fn append(&self, stream_id: &str, events: Vec<NewEvent>, expected_version: i64) -> Result<i64, EventStoreError>;

    /// Returns events in sequence order, optionally bounded by
    /// `from_version`/`to_version` (inclusive).
    async fn read(&self, stream_id: &str, from_version: Option<i64>, to_version: Option<i64>) -> Result<Vec<EventEnvelope>, EventStoreError>;

    async fn load_snapshot(&self, stream_id: &str) -> Result<Option<Snapshot>, EventStoreError>;

    async fn save_snapshot(&self, stream_id: &str, state_bytes: Vec<u8>, version: i64) -> Result<(), EventStoreError>;

    /// Current version of the stream (0 if it doesn't exist yet).
    async fn current_version(&self, stream_id: &str) -> Result<i64, EventStoreError>;
}

pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

pub const STREAM_MUST_NOT_EXIST: i64 = -1;
