use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use resq_core::{EventId, EventStatus, EventType, QueuedEvent, UnknownStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use ulid::Ulid;

use crate::storage::{CleanupStats, EventStorage, StatusUpdate, StorageStats, retention_cutoff};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const COLUMNS: &str = "id, event_type, data, status, retry_count, max_retries, created_at, last_attempt_at, error_message";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStorageError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    InvalidStatus(#[from] UnknownStatus),
}

/// SQLite-backed storage. Survives process restarts.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` and run pending migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, SqliteStorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteStorageError> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

fn millis_to_timestamp(millis: i64) -> Result<Timestamp, SqliteStorageError> {
    Timestamp::from_millisecond(millis).map_err(|_| SqliteStorageError::InvalidTimestamp(millis))
}

fn row_to_event(row: &SqliteRow) -> Result<QueuedEvent, SqliteStorageError> {
    let id: String = row.try_get("id")?;
    let id = Ulid::from_string(&id).map_err(|_| SqliteStorageError::InvalidUlid(id))?;

    let event_type: String = row.try_get("event_type")?;
    let data: String = row.try_get("data")?;
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;
    let created_at: i64 = row.try_get("created_at")?;
    let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;
    let error_message: Option<String> = row.try_get("error_message")?;

    Ok(QueuedEvent {
        id: EventId(id),
        event_type: EventType::from(event_type),
        data: serde_json::from_str(&data)?,
        status: EventStatus::from_str(&status)?,
        retry_count: retry_count as u32,
        max_retries: max_retries as u32,
        created_at: millis_to_timestamp(created_at)?,
        last_attempt_at: last_attempt_at.map(millis_to_timestamp).transpose()?,
        error_message: error_message.map(String::into_boxed_str),
    })
}

#[async_trait]
impl EventStorage for SqliteStorage {
    type Error = SqliteStorageError;

    async fn insert(&self, event: QueuedEvent) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO queued_events (id, event_type, data, status, retry_count, max_retries, created_at, last_attempt_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.event_type.as_str())
        .bind(serde_json::to_string(&event.data)?)
        .bind(event.status.as_str())
        .bind(event.retry_count as i64)
        .bind(event.max_retries as i64)
        .bind(event.created_at.as_millisecond())
        .bind(event.last_attempt_at.map(|t| t.as_millisecond()))
        .bind(event.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Option<QueuedEvent>, Self::Error> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM queued_events WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn list(&self) -> Result<Vec<QueuedEvent>, Self::Error> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM queued_events ORDER BY seq"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn fetch_pending(&self) -> Result<Vec<QueuedEvent>, Self::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM queued_events
            WHERE status = 'pending'
               OR (status = 'failed' AND retry_count < max_retries)
            ORDER BY seq
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn update_status(&self, id: EventId, update: StatusUpdate) -> Result<bool, Self::Error> {
        let at = update.at.as_millisecond();

        let query = match update.status {
            EventStatus::Failed => sqlx::query(
                r#"
                UPDATE queued_events
                SET status = 'failed',
                    retry_count = CASE WHEN ? THEN MAX(retry_count + 1, max_retries) ELSE retry_count + 1 END,
                    error_message = ?,
                    last_attempt_at = ?
                WHERE id = ?
                "#,
            )
            .bind(update.exhaust)
            .bind(update.error_message.as_deref())
            .bind(at),
            EventStatus::Processing | EventStatus::Completed => sqlx::query(
                r#"
                UPDATE queued_events
                SET status = ?, error_message = NULL, last_attempt_at = ?
                WHERE id = ?
                "#,
            )
            .bind(update.status.as_str())
            .bind(at),
            EventStatus::Pending => sqlx::query(
                "UPDATE queued_events SET status = 'pending', error_message = NULL WHERE id = ?",
            ),
        };

        let result = query.bind(id.to_string()).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: EventId) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM queued_events WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_interrupted(&self) -> Result<usize, Self::Error> {
        let result = sqlx::query(
            "UPDATE queued_events SET status = 'pending', error_message = NULL WHERE status = 'processing'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn cleanup_completed(&self, older_than: Duration) -> Result<CleanupStats, Self::Error> {
        let cutoff = retention_cutoff(older_than).as_millisecond();

        let result = sqlx::query(
            r#"
            DELETE FROM queued_events
            WHERE status = 'completed' AND COALESCE(last_attempt_at, created_at) < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(CleanupStats {
            completed_deleted: result.rows_affected() as usize,
        })
    }

    async fn clear(&self) -> Result<usize, Self::Error> {
        let result = sqlx::query("DELETE FROM queued_events")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn get_stats(&self) -> Result<StorageStats, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT status, retry_count >= max_retries AS exhausted, COUNT(*) AS count
            FROM queued_events
            GROUP BY status, exhausted
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StorageStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let exhausted = row.try_get::<i64, _>("exhausted")? != 0;
            let count = row.try_get::<i64, _>("count")? as usize;

            match EventStatus::from_str(&status)? {
                EventStatus::Pending => stats.pending += count,
                EventStatus::Processing => stats.processing += count,
                EventStatus::Completed => stats.completed += count,
                EventStatus::Failed if exhausted => stats.exhausted += count,
                EventStatus::Failed => stats.failed += count,
            }
            stats.total += count;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event() -> QueuedEvent {
        QueuedEvent::new(
            EventType::PersonnelStatus,
            json!({"userId": "u-1", "statusType": "2"}),
            2,
        )
    }

    #[tokio::test]
    async fn insert_and_get_round_trips_all_columns() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut event = event();
        event.error_message = Some("boom".into());
        event.status = EventStatus::Failed;
        event.retry_count = 1;
        event.last_attempt_at = Some(Timestamp::from_millisecond(1_700_000_000_123).unwrap());

        storage.insert(event.clone()).await.unwrap();

        let stored = storage.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.id, event.id);
        assert_eq!(stored.data, event.data);
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_attempt_at, event.last_attempt_at);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(
            stored.created_at.as_millisecond(),
            event.created_at.as_millisecond()
        );
    }

    #[tokio::test]
    async fn failed_update_counts_attempts_in_sql() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let event = event();
        storage.insert(event.clone()).await.unwrap();

        for _ in 0..2 {
            let updated = storage
                .update_status(event.id, StatusUpdate::failed("503"))
                .await
                .unwrap();
            assert!(updated);
        }

        let stored = storage.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert!(storage.fetch_pending().await.unwrap().is_empty());

        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();

        let updated = storage
            .update_status(EventId::new(), StatusUpdate::new(EventStatus::Completed))
            .await
            .unwrap();
        assert!(!updated);
        assert!(!storage.remove(EventId::new()).await.unwrap());
    }
}
