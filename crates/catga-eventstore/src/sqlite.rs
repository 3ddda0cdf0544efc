//! SQLite-backed event store. Grounded on `catga-outbox`'s
//! guarded-`UPDATE`-checked-by-`rows_affected` idiom (itself from
//! `fc-queue::sqlite`): the stream's version row is advanced with a
//! single conditional `UPDATE ... WHERE version = ?`, and a
//! `rows_affected() == 0` means a concurrent append already won —
//! exactly the same shape as a lease race, just keyed by `version`
//! instead of `lease_expires_at`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::{EventEnvelope, EventStore, EventStoreError, NewEvent, Snapshot, STREAM_MUST_NOT_EXIST};

pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_stream_versions (
                stream_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_store_events (
                stream_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                metadata_json TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (stream_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_store_snapshots (
                stream_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state_bytes BLOB NOT NULL,
                taken_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, stream_id: &str, events: Vec<NewEvent>, expected_version: i64) -> Result<i64, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;

        let current: Option<i64> = sqlx::query("SELECT version FROM event_stream_versions WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| EventStoreError::Persistence(e.to_string()))?
            .map(|row| row.get("version"));

        let current_version = current.unwrap_or(0);
        let expectation_met = if expected_version == STREAM_MUST_NOT_EXIST { current.is_none() } else { current_version == expected_version };
        if !expectation_met {
            return Err(EventStoreError::ConcurrencyConflict { stream_id: stream_id.to_string(), expected: expected_version, actual: current_version });
        }

        let mut sequence = current_version;
        let now = Utc::now();
        for event in &events {
            sequence += 1;
            let metadata_json = serde_json::to_string(&event.metadata).map_err(|e| EventStoreError::Persistence(e.to_string()))?;
            sqlx::query(
                r#"INSERT INTO event_store_events (stream_id, sequence, event_type, payload, metadata_json, timestamp)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(stream_id)
            .bind(sequence)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(metadata_json)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        }

        let version_write = if current.is_some() {
            sqlx::query("UPDATE event_stream_versions SET version = ? WHERE stream_id = ? AND version = ?")
                .bind(sequence)
                .bind(stream_id)
                .bind(current_version)
                .execute(&mut *tx)
                .await
        } else {
            sqlx::query("INSERT INTO event_stream_versions (stream_id, version) VALUES (?, ?)")
                .bind(stream_id)
                .bind(sequence)
                .execute(&mut *tx)
                .await
        }
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;

        if version_write.rows_affected() == 0 {
            // Lost the race between our SELECT and our guarded write;
            // roll back and surface a conflict rather than double-commit.
            tx.rollback().await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;
            return Err(EventStoreError::ConcurrencyConflict { stream_id: stream_id.to_string(), expected: expected_version, actual: current_version });
        }

        tx.commit().await.map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(sequence)
    }

    async fn read(&self, stream_id: &str, from_version: Option<i64>, to_version: Option<i64>) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let from = from_version.unwrap_or(1);
        let to = to_version.unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT sequence, event_type, payload, metadata_json, timestamp FROM event_store_events
             WHERE stream_id = ? AND sequence >= ? AND sequence <= ? ORDER BY sequence ASC",
        )
        .bind(stream_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let metadata_json: String = row.try_get("metadata_json").map_err(|e| EventStoreError::Persistence(e.to_string()))?;
                let timestamp: String = row.try_get("timestamp").map_err(|e| EventStoreError::Persistence(e.to_string()))?;
                Ok(EventEnvelope {
                    sequence: row.try_get("sequence").map_err(|e| EventStoreError::Persistence(e.to_string()))?,
                    event_type: row.try_get("event_type").map_err(|e| EventStoreError::Persistence(e.to_string()))?,
                    payload: row.try_get("payload").map_err(|e| EventStoreError::Persistence(e.to_string()))?,
                    metadata: serde_json::from_str(&metadata_json).map_err(|e| EventStoreError::Persistence(e.to_string()))?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect()
    }

    async fn load_snapshot(&self, stream_id: &str) -> Result<Option<Snapshot>, EventStoreError> {
        let row = sqlx::query("SELECT version, state_bytes, taken_at FROM event_store_snapshots WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let taken_at: String = row.try_get("taken_at").map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(Some(Snapshot {
            stream_id: stream_id.to_string(),
            version: row.try_get("version").map_err(|e| EventStoreError::Persistence(e.to_string()))?,
            state_bytes: row.try_get("state_bytes").map_err(|e| EventStoreError::Persistence(e.to_string()))?,
            taken_at: chrono::DateTime::parse_from_rfc3339(&taken_at).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn save_snapshot(&self, stream_id: &str, state_bytes: Vec<u8>, version: i64) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"INSERT INTO event_store_snapshots (stream_id, version, state_bytes, taken_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(stream_id) DO UPDATE SET version = excluded.version, state_bytes = excluded.state_bytes, taken_at = excluded.taken_at"#,
        )
        .bind(stream_id)
        .bind(version)
        .bind(&state_bytes)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn current_version(&self, stream_id: &str) -> Result<i64, EventStoreError> {
        let row = sqlx::query("SELECT version FROM event_stream_versions WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventStoreError::Persistence(e.to_string()))?;
        Ok(row.map(|r| r.get::<i64, _>("version")).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteEventStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = SqliteEventStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let store = test_store().await;
        let v = store.append("order-1", vec![NewEvent::new("OrderCreated", b"{}".to_vec())], STREAM_MUST_NOT_EXIST).await.unwrap();
        assert_eq!(v, 1);
        let events = store.read("order-1", None, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 1);
    }

    #[tokio::test]
    async fn concurrent_append_with_stale_expected_version_conflicts() {
        let store = test_store().await;
        store.append("order-1", vec![NewEvent::new("A", vec![])], STREAM_MUST_NOT_EXIST).await.unwrap();
        let err = store.append("order-1", vec![NewEvent::new("B", vec![])], 0).await.unwrap_err();
        assert!(matches!(err, EventStoreError::ConcurrencyConflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let store = test_store().await;
        store.append("order-1", vec![NewEvent::new("A", vec![])], STREAM_MUST_NOT_EXIST).await.unwrap();
        store.save_snapshot("order-1", b"state".to_vec(), 1).await.unwrap();
        let snap = store.load_snapshot("order-1").await.unwrap().unwrap();
        assert_eq!(snap.state_bytes, b"state");
    }
}
