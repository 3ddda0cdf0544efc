//! Durable outbox store (spec §4.D), grounded on
//! `fc-outbox::{repository,recovery}` and `fc-queue::sqlite`'s
//! lease-by-conditional-UPDATE idiom.
//!
//! Inbox ops (`TryBeginProcess`/`Complete`) live in `catga-idempotency`
//! instead of here — they're the same "atomic first-writer-wins
//! keyed record with TTL" shape as the idempotency store, and the
//! teacher's own `fc-outbox` delegates inbox-style dedup to a shared
//! keyed store rather than a second bespoke table. Recovery from a
//! crash mid-publish needs no separate sweep loop: `lease_pending`'s
//! `WHERE status = 'pending' OR (status = 'publishing' AND
//! lease_expires_at <= now)` reclaims expired leases on its own next
//! call, exactly as `fc-queue::sqlite`'s visibility-timeout UPDATE
//! does for queue messages.

pub mod memory;
pub mod publisher;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("record {0} not found")]
    NotFound(i64),
}

impl From<OutboxError> for catga_core::ErrorCode {
    fn from(_: OutboxError) -> Self {
        catga_core::ErrorCode::PersistenceFailed
    }
}

/// spec §3 `OutboxRecord`. Status transitions form a DAG:
/// `Pending -> Publishing -> {Published|Failed}`; `Failed` may loop
/// back to `Pending` on retry; `Published` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Publishing,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Publishing => "publishing",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "publishing" => OutboxStatus::Publishing,
            "published" => OutboxStatus::Published,
            "failed" => OutboxStatus::Failed,
            _ => OutboxStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: i64,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOutboxRecord {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub message_type: String,
    pub payload: Vec<u8>,
}

/// spec §4.D outbox ops.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn append(&self, record: NewOutboxRecord) -> Result<i64, OutboxError>;

    /// Leases up to `batch_size` records in `Pending` (or whose prior
    /// lease expired) and marks them `Publishing` with a fresh
    /// `lease_expires_at`, atomically per record.
    async fn lease_pending(&self, batch_size: u32, lease_duration: chrono::Duration) -> Result<Vec<OutboxRecord>, OutboxError>;

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), OutboxError>;
}

pub use memory::InMemoryOutboxStore;
pub use publisher::{OutboxPublisher, OutboxPublisherConfig};
pub use sqlite::SqliteOutboxStore;
