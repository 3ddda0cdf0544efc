//! In-memory outbox store — used for single-node deployments without
//! a database and for exercising `OutboxStore` in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{NewOutboxRecord, OutboxError, OutboxRecord, OutboxStatus, OutboxStore};

#[derive(Default)]
pub struct InMemoryOutboxStore {
    records: Mutex<HashMap<i64, OutboxRecord>>,
    next_id: AtomicI64,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn append(&self, record: NewOutboxRecord) -> Result<i64, OutboxError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        self.records.lock().insert(
            id,
            OutboxRecord {
                id,
                message_id: record.message_id,
                correlation_id: record.correlation_id,
                message_type: record.message_type,
                payload: record.payload,
                status: OutboxStatus::Pending,
                attempts: 0,
                created_at: now,
                last_attempt_at: None,
                last_error: None,
                lease_expires_at: None,
            },
        );
        Ok(id)
    }

    async fn lease_pending(&self, batch_size: u32, lease_duration: chrono::Duration) -> Result<Vec<OutboxRecord>, OutboxError> {
        let now = Utc::now();
        let mut records = self.records.lock();

        // FIFO by created_at within this single logical worker (spec
        // §4.D "within a single stream/partition, FIFO by createdAt").
        let mut eligible: Vec<i64> = records
            .values()
            .filter(|r| match r.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Publishing => r.lease_expires_at.map(|exp| exp <= now).unwrap_or(false),
                _ => false,
            })
            .map(|r| r.id)
            .collect();
        eligible.sort_by_key(|id| records[id].created_at);
        eligible.truncate(batch_size as usize);

        let mut leased = Vec::with_capacity(eligible.len());
        for id in eligible {
            let r = records.get_mut(&id).expect("id came from this same map");
            r.status = OutboxStatus::Publishing;
            r.attempts += 1;
            r.last_attempt_at = Some(now);
            r.lease_expires_at = Some(now + lease_duration);
            leased.push(r.clone());
        }
        Ok(leased)
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        let r = records.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        r.status = OutboxStatus::Published;
        r.lease_expires_at = None;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        let r = records.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        r.status = OutboxStatus::Failed;
        r.last_error = Some(error.to_string());
        r.lease_expires_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(message_id: &str) -> NewOutboxRecord {
        NewOutboxRecord {
            message_id: message_id.to_string(),
            correlation_id: None,
            message_type: "OrderCreated".to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn lease_then_mark_published_moves_through_the_dag() {
        let store = InMemoryOutboxStore::new();
        let id = store.append(new_record("M1")).await.unwrap();
        let leased = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].status, OutboxStatus::Publishing);
        store.mark_published(id).await.unwrap();

        // Published is terminal: it's no longer leasable.
        let leased_again = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert!(leased_again.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_reverts_to_leasable_without_a_recovery_sweep() {
        let store = InMemoryOutboxStore::new();
        store.append(new_record("M2")).await.unwrap();
        let first = store.lease_pending(10, chrono::Duration::milliseconds(-1)).await.unwrap();
        assert_eq!(first.len(), 1);

        // The lease is already expired (negative duration), so the next
        // lease call reclaims it — this is the crash-recovery path.
        let second = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attempts, 2);
    }

    #[tokio::test]
    async fn mark_failed_records_the_error_and_releases_the_lease() {
        let store = InMemoryOutboxStore::new();
        let id = store.append(new_record("M3")).await.unwrap();
        store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        store.mark_failed(id, "downstream 500").await.unwrap();
        let leased = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        // Failed records aren't automatically re-leased; a retry policy
        // decides whether to reset them to Pending.
        assert!(leased.is_empty());
    }

    #[tokio::test]
    async fn lease_batch_respects_fifo_order_by_created_at() {
        let store = InMemoryOutboxStore::new();
        let id1 = store.append(new_record("A")).await.unwrap();
        let id2 = store.append(new_record("B")).await.unwrap();
        let leased = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(leased[0].id, id1);
        assert_eq!(leased[1].id, id2);
    }
}
