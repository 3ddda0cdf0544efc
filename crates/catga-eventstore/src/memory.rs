//! In-memory event store — the reference implementation the other two
//! backends must stay behaviorally identical to (spec §4.M parity
//! contract, applied here to §4.J since both share the optimistic-CAS
//! append shape).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::{EventEnvelope, EventStore, EventStoreError, NewEvent, Snapshot, STREAM_MUST_NOT_EXIST};

#[derive(Default)]
struct StreamRecord {
    events: Vec<EventEnvelope>,
    version: i64,
    snapshot: Option<Snapshot>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<String, StreamRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &str, events: Vec<NewEvent>, expected_version: i64) -> Result<i64, EventStoreError> {
        let mut streams = self.streams.lock();
        let exists = streams.contains_key(stream_id);
        let record = streams.entry(stream_id.to_string()).or_default();

        let current = record.version;
        let expectation_met = if expected_version == STREAM_MUST_NOT_EXIST { !exists } else { current == expected_version };
        if !expectation_met {
            return Err(EventStoreError::ConcurrencyConflict { stream_id: stream_id.to_string(), expected: expected_version, actual: current });
        }

        let mut sequence = current;
        for event in events {
            sequence += 1;
            record.events.push(EventEnvelope {
                sequence,
                event_type: event.event_type,
                payload: event.payload,
                metadata: event.metadata,
                timestamp: Utc::now(),
            });
        }
        record.version = sequence;
        Ok(record.version)
    }

    async fn read(&self, stream_id: &str, from_version: Option<i64>, to_version: Option<i64>) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let streams = self.streams.lock();
        let Some(record) = streams.get(stream_id) else { return Ok(Vec::new()) };
        let from = from_version.unwrap_or(1);
        let to = to_version.unwrap_or(i64::MAX);
        Ok(record.events.iter().filter(|e| e.sequence >= from && e.sequence <= to).cloned().collect())
    }

    async fn load_snapshot(&self, stream_id: &str) -> Result<Option<Snapshot>, EventStoreError> {
        Ok(self.streams.lock().get(stream_id).and_then(|r| r.snapshot.clone()))
    }

    async fn save_snapshot(&self, stream_id: &str, state_bytes: Vec<u8>, version: i64) -> Result<(), EventStoreError> {
        let mut streams = self.streams.lock();
        let record = streams.entry(stream_id.to_string()).or_default();
        record.snapshot = Some(Snapshot { stream_id: stream_id.to_string(), version, state_bytes, taken_at: Utc::now() });
        Ok(())
    }

    async fn current_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        Ok(self.streams.lock().get(stream_id).map(|r| r.version).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_requires_stream_must_not_exist_for_negative_one() {
        let store = InMemoryEventStore::new();
        let v = store.append("order-1", vec![NewEvent::new("OrderCreated", b"{}".to_vec())], STREAM_MUST_NOT_EXIST).await.unwrap();
        assert_eq!(v, 1);

        let err = store.append("order-1", vec![NewEvent::new("OrderCreated", b"{}".to_vec())], STREAM_MUST_NOT_EXIST).await.unwrap_err();
        assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn sequence_is_dense_and_strictly_increasing() {
        let store = InMemoryEventStore::new();
        store
            .append("order-1", vec![NewEvent::new("A", vec![]), NewEvent::new("B", vec![])], STREAM_MUST_NOT_EXIST)
            .await
            .unwrap();
        store.append("order-1", vec![NewEvent::new("C", vec![])], 2).await.unwrap();

        let events = store.read("order-1", None, None).await.unwrap();
        let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn mismatched_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        store.append("order-1", vec![NewEvent::new("A", vec![])], STREAM_MUST_NOT_EXIST).await.unwrap();
        let err = store.append("order-1", vec![NewEvent::new("B", vec![])], 0).await.unwrap_err();
        assert!(matches!(err, EventStoreError::ConcurrencyConflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let store = InMemoryEventStore::new();
        store.append("order-1", vec![NewEvent::new("A", vec![])], STREAM_MUST_NOT_EXIST).await.unwrap();
        assert!(store.load_snapshot("order-1").await.unwrap().is_none());
        store.save_snapshot("order-1", b"state".to_vec(), 1).await.unwrap();
        let snap = store.load_snapshot("order-1").await.unwrap().unwrap();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.state_bytes, b"state");
    }

    #[tokio::test]
    async fn read_respects_version_bounds() {
        let store = InMemoryEventStore::new();
        store
            .append("s", vec![NewEvent::new("A", vec![]), NewEvent::new("B", vec![]), NewEvent::new("C", vec![])], STREAM_MUST_NOT_EXIST)
            .await
            .unwrap();
        let events = store.read("s", Some(2), Some(2)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "B");
    }
}
