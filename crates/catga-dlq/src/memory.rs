//! In-memory dead-letter store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{DlqError, DlqFilter, DlqRecord, DlqStore, NewDlqRecord, Page, PurgeTarget};

#[derive(Default)]
pub struct InMemoryDlqStore {
    records: Mutex<HashMap<String, DlqRecord>>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn enqueue(&self, record: NewDlqRecord) -> Result<(), DlqError> {
        let now = Utc::now();
        let mut records = self.records.lock();
        let first_seen = records.get(&record.message_id).map(|r| r.first_seen).unwrap_or(now);
        records.insert(
            record.message_id.clone(),
            DlqRecord {
                message_id: record.message_id,
                message_type: record.message_type,
                payload: record.payload,
                last_error: record.last_error,
                attempts: record.attempts,
                first_seen,
                last_seen: now,
            },
        );
        Ok(())
    }

    async fn list(&self, filter: &DlqFilter, page: Page) -> Result<Vec<DlqRecord>, DlqError> {
        let mut matching: Vec<DlqRecord> = self.records.lock().values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by_key(|r| r.first_seen);
        Ok(matching.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn get(&self, message_id: &str) -> Result<Option<DlqRecord>, DlqError> {
        Ok(self.records.lock().get(message_id).cloned())
    }

    async fn purge(&self, target: PurgeTarget) -> Result<u64, DlqError> {
        let mut records = self.records.lock();
        match target {
            PurgeTarget::Id(id) => Ok(records.remove(&id).is_some() as u64),
            PurgeTarget::OlderThan(cutoff) => {
                let before = records.len();
                records.retain(|_, r| r.last_seen >= cutoff);
                Ok((before - records.len()) as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay;
    use async_trait::async_trait;
    use catga_transport::{SubscriptionHandle, Transport, TransportContext, TransportError};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    fn new_record(id: &str) -> NewDlqRecord {
        NewDlqRecord {
            message_id: id.to_string(),
            message_type: "OrderCreated".to_string(),
            payload: b"{}".to_vec(),
            last_error: "downstream unreachable".to_string(),
            attempts: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_then_get_round_trips() {
        let store = InMemoryDlqStore::new();
        store.enqueue(new_record("M1")).await.unwrap();
        let record = store.get("M1").await.unwrap().unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_error, "downstream unreachable");
    }

    #[tokio::test]
    async fn re_enqueue_keeps_first_seen_but_bumps_last_seen_and_attempts() {
        let store = InMemoryDlqStore::new();
        store.enqueue(new_record("M2")).await.unwrap();
        let first = store.get("M2").await.unwrap().unwrap();

        let mut retried = new_record("M2");
        retried.attempts = 4;
        store.enqueue(retried).await.unwrap();
        let second = store.get("M2").await.unwrap().unwrap();

        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(second.attempts, 4);
    }

    #[tokio::test]
    async fn list_filters_by_message_type() {
        let store = InMemoryDlqStore::new();
        store.enqueue(new_record("M3")).await.unwrap();
        let mut other = new_record("M4");
        other.message_type = "PaymentFailed".to_string();
        store.enqueue(other).await.unwrap();

        let filter = DlqFilter { message_type: Some("PaymentFailed".to_string()), older_than: None };
        let page = store.list(&filter, Page::default()).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message_id, "M4");
    }

    #[tokio::test]
    async fn purge_by_id_removes_one_record() {
        let store = InMemoryDlqStore::new();
        store.enqueue(new_record("M5")).await.unwrap();
        let removed = store.purge(PurgeTarget::Id("M5".to_string())).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("M5").await.unwrap().is_none());
    }

    struct RecordingTransport {
        published: Arc<AsyncMutex<Vec<(String, Vec<u8>)>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, subject: &str, payload: Vec<u8>, _ctx: TransportContext) -> Result<(), TransportError> {
            self.published.lock().await.push((subject.to_string(), payload));
            Ok(())
        }

        async fn send_and_receive(
            &self,
            _subject: &str,
            _payload: Vec<u8>,
            _ctx: TransportContext,
            _timeout: std::time::Duration,
        ) -> Result<Vec<u8>, TransportError> {
            unimplemented!("not exercised by replay")
        }

        async fn subscribe(
            &self,
            _subject: &str,
            _queue_group: Option<&str>,
            _handler: Arc<dyn catga_transport::MessageHandler>,
        ) -> Result<SubscriptionHandle, TransportError> {
            unimplemented!("not exercised by replay")
        }
    }

    #[tokio::test]
    async fn replay_re_emits_the_payload_through_the_transport() {
        let store = InMemoryDlqStore::new();
        store.enqueue(new_record("M6")).await.unwrap();
        let published = Arc::new(AsyncMutex::new(Vec::new()));
        let transport = RecordingTransport { published: published.clone() };

        replay(&store, &transport, "orders.created", "M6").await.unwrap();

        let sent = published.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "orders.created");
        assert_eq!(sent[0].1, b"{}".to_vec());
    }

    #[tokio::test]
    async fn replay_of_unknown_message_fails_with_not_found() {
        let store = InMemoryDlqStore::new();
        let transport = RecordingTransport { published: Arc::new(AsyncMutex::new(Vec::new())) };
        let err = replay(&store, &transport, "orders.created", "missing").await.unwrap_err();
        assert!(matches!(err, DlqError::NotFound(id) if id == "missing"));
    }
}
