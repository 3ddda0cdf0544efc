//! SQLite-backed outbox store, directly grounded on
//! `fc-queue::sqlite`'s visibility-timeout idiom: lease via a single
//! `UPDATE ... WHERE status = 'pending' OR (status = 'publishing' AND
//! lease_expires_at <= ?)`, checked by `rows_affected`, never a
//! SELECT-then-UPDATE race.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::{NewOutboxRecord, OutboxError, OutboxRecord, OutboxStatus, OutboxStore};

pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `outbox` table if it doesn't exist yet. Migration
    /// management beyond this is the deploying application's concern.
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                correlation_id TEXT,
                message_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_attempt_at TEXT,
                last_error TEXT,
                lease_expires_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxRecord, OutboxError> {
        let status: String = row.try_get("status").map_err(|e| OutboxError::Persistence(e.to_string()))?;
        let created_at: String = row.try_get("created_at").map_err(|e| OutboxError::Persistence(e.to_string()))?;
        let last_attempt_at: Option<String> = row.try_get("last_attempt_at").map_err(|e| OutboxError::Persistence(e.to_string()))?;
        let lease_expires_at: Option<String> = row.try_get("lease_expires_at").map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(OutboxRecord {
            id: row.try_get("id").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            message_id: row.try_get("message_id").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            correlation_id: row.try_get("correlation_id").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            message_type: row.try_get("message_type").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            payload: row.try_get("payload").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            status: OutboxStatus::from_str(&status),
            attempts: {
                let a: i64 = row.try_get("attempts").map_err(|e| OutboxError::Persistence(e.to_string()))?;
                a as u32
            },
            created_at: parse_ts(&created_at),
            last_attempt_at: last_attempt_at.as_deref().map(parse_ts),
            last_error: row.try_get("last_error").map_err(|e| OutboxError::Persistence(e.to_string()))?,
            lease_expires_at: lease_expires_at.as_deref().map(parse_ts),
        })
    }
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn append(&self, record: NewOutboxRecord) -> Result<i64, OutboxError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"INSERT INTO outbox (message_id, correlation_id, message_type, payload, status, attempts, created_at)
               VALUES (?, ?, ?, ?, 'pending', 0, ?)"#,
        )
        .bind(&record.message_id)
        .bind(&record.correlation_id)
        .bind(&record.message_type)
        .bind(&record.payload)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    async fn lease_pending(&self, batch_size: u32, lease_duration: chrono::Duration) -> Result<Vec<OutboxRecord>, OutboxError> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let lease_expires_at = (now + lease_duration).to_rfc3339();

        // Candidate ids first (SQLite has no `UPDATE ... LIMIT ... RETURNING`
        // with ordering guarantees across all builds), then a guarded
        // per-row UPDATE exactly like `fc-queue::sqlite`'s visibility-
        // timeout CAS: `rows_affected() == 0` means another worker beat
        // us to that row, so we simply skip it rather than erroring.
        let candidates: Vec<i64> = sqlx::query(
            r#"SELECT id FROM outbox
               WHERE status = 'pending' OR (status = 'publishing' AND lease_expires_at <= ?)
               ORDER BY created_at ASC
               LIMIT ?"#,
        )
        .bind(&now_str)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Persistence(e.to_string()))?
        .into_iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();

        let mut leased = Vec::with_capacity(candidates.len());
        for id in candidates {
            let updated = sqlx::query(
                r#"UPDATE outbox SET status = 'publishing', attempts = attempts + 1,
                       last_attempt_at = ?, lease_expires_at = ?
                   WHERE id = ? AND (status = 'pending' OR (status = 'publishing' AND lease_expires_at <= ?))"#,
            )
            .bind(&now_str)
            .bind(&lease_expires_at)
            .bind(id)
            .bind(&now_str)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;

            if updated.rows_affected() == 0 {
                continue; // lost the race to another worker
            }

            let row = sqlx::query("SELECT * FROM outbox WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OutboxError::Persistence(e.to_string()))?;
            leased.push(Self::row_to_record(&row)?);
        }
        Ok(leased)
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        let updated = sqlx::query("UPDATE outbox SET status = 'published', lease_expires_at = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        if updated.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), OutboxError> {
        let updated = sqlx::query("UPDATE outbox SET status = 'failed', last_error = ?, lease_expires_at = NULL WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Persistence(e.to_string()))?;
        if updated.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteOutboxStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = SqliteOutboxStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn append_and_lease_round_trip() {
        let store = test_store().await;
        store
            .append(NewOutboxRecord {
                message_id: "M1".into(),
                correlation_id: None,
                message_type: "OrderCreated".into(),
                payload: b"{}".to_vec(),
            })
            .await
            .unwrap();
        let leased = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].status, OutboxStatus::Publishing);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_on_next_lease_call() {
        let store = test_store().await;
        store
            .append(NewOutboxRecord {
                message_id: "M2".into(),
                correlation_id: None,
                message_type: "OrderCreated".into(),
                payload: b"{}".to_vec(),
            })
            .await
            .unwrap();
        store.lease_pending(10, chrono::Duration::milliseconds(-1)).await.unwrap();
        let reclaimed = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn mark_published_is_terminal() {
        let store = test_store().await;
        let id = store
            .append(NewOutboxRecord {
                message_id: "M3".into(),
                correlation_id: None,
                message_type: "OrderCreated".into(),
                payload: b"{}".to_vec(),
            })
            .await
            .unwrap();
        store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        store.mark_published(id).await.unwrap();
        let leased_again = store.lease_pending(10, chrono::Duration::seconds(30)).await.unwrap();
        assert!(leased_again.is_empty());
    }
}
