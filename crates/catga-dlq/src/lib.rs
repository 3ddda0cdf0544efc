//! Dead-letter queue (spec §4.N): the terminal store for messages that
//! exhausted `retry.maxAttempts`. Grounded on `fc-outbox::repository`'s
//! `OutboxRepository` trait shape — `Enqueue`/`List`/`Purge` mirror its
//! `fetch_pending_by_type`/`fetch_stuck_items`/cleanup operations, with
//! `Replay` added to re-emit through `catga-transport::Transport`
//! instead of re-queuing into the outbox.

pub mod memory;

use async_trait::async_trait;
use catga_transport::{Transport, TransportContext, TransportError};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("message {0} not found in dead-letter queue")]
    NotFound(String),
    #[error("replay failed: {0}")]
    Replay(#[from] TransportError),
}

impl From<DlqError> for catga_core::ErrorCode {
    fn from(_: DlqError) -> Self {
        catga_core::ErrorCode::PersistenceFailed
    }
}

/// spec §3/§4.N dead-letter record.
#[derive(Debug, Clone)]
pub struct DlqRecord {
    pub message_id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub last_error: String,
    pub attempts: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDlqRecord {
    pub message_id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub last_error: String,
    pub attempts: u32,
}

/// `List` filter (spec §4.N). `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub message_type: Option<String>,
    pub older_than: Option<DateTime<Utc>>,
}

impl DlqFilter {
    fn matches(&self, record: &DlqRecord) -> bool {
        if let Some(ty) = &self.message_type {
            if &record.message_type != ty {
                return false;
            }
        }
        if let Some(cutoff) = self.older_than {
            if record.last_seen >= cutoff {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// A specific record or every record older than a cutoff (spec §4.N
/// `Purge(id|older-than)`).
pub enum PurgeTarget {
    Id(String),
    OlderThan(DateTime<Utc>),
}

/// spec §4.N dead-letter ops.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Inserts or, if `message_id` already has an entry, overwrites it
    /// with a fresh `last_error`/`last_seen`/`attempts` (a message can
    /// be redelivered and land back in the DLQ more than once).
    async fn enqueue(&self, record: NewDlqRecord) -> Result<(), DlqError>;

    async fn list(&self, filter: &DlqFilter, page: Page) -> Result<Vec<DlqRecord>, DlqError>;

    async fn get(&self, message_id: &str) -> Result<Option<DlqRecord>, DlqError>;

    async fn purge(&self, target: PurgeTarget) -> Result<u64, DlqError>;
}

/// Re-emits a dead-lettered message through `transport`, unchanged: the
/// caller decides whether to remove it from the DLQ on success (spec
/// §4.N doesn't make `Replay` implicitly delete, since a replay can
/// itself fail downstream and the operator may want the record kept
/// until they've confirmed the redelivery stuck).
pub async fn replay<S: DlqStore + ?Sized>(store: &S, transport: &dyn Transport, subject: &str, message_id: &str) -> Result<(), DlqError> {
    let record = store.get(message_id).await?.ok_or_else(|| DlqError::NotFound(message_id.to_string()))?;
    let ctx = TransportContext::new(record.message_id.clone(), record.message_type.clone());
    transport.publish(subject, record.payload, ctx).await?;
    Ok(())
}

pub use memory::InMemoryDlqStore;
