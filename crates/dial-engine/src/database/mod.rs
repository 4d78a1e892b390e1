//! SQLite-backed call store
//!
//! Durable implementation of [`CallStore`] used by the dashboard process.
//! Timestamps are stored as RFC 3339 text; the write-once rule for
//! `answered_at` is enforced in SQL (`WHERE answered_at IS NULL`) so it
//! holds across processes, not just within one.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use chrono::{DateTime, Utc};

use async_trait::async_trait;
use outdial_fleet_core::DeviceId;

use crate::error::{DialEngineError, Result};
use crate::store::CallStore;
use crate::types::{CallId, CallRecord, CallStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS call_records (
    id TEXT PRIMARY KEY,
    number TEXT NOT NULL,
    status TEXT NOT NULL,
    device_id TEXT,
    start_time TEXT NOT NULL,
    answered_at TEXT,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0,
    campaign_id TEXT,
    session_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_call_records_device_status
    ON call_records(device_id, status);
CREATE INDEX IF NOT EXISTS idx_call_records_session
    ON call_records(session_id);
"#;

/// Call store persisted in SQLite
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    /// Connect to the given database URL and ensure the schema exists
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init().await?;
        info!("💾 Call store ready at {}", database_url);
        Ok(store)
    }

    /// In-memory database on a single connection
    ///
    /// More than one connection to `sqlite::memory:` would each see a
    /// separate empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<CallRecord> {
        let status_raw: String = row.try_get("status")?;
        let status = CallStatus::parse(&status_raw).ok_or_else(|| {
            DialEngineError::store(format!("Unknown persisted status: {}", status_raw))
        })?;
        Ok(CallRecord {
            id: CallId(row.try_get("id")?),
            number: row.try_get("number")?,
            status,
            device_id: row
                .try_get::<Option<String>, _>("device_id")?
                .map(DeviceId::new),
            start_time: row.try_get::<DateTime<Utc>, _>("start_time")?,
            answered_at: row.try_get::<Option<DateTime<Utc>>, _>("answered_at")?,
            duration_seconds: row.try_get::<i64, _>("duration_seconds")? as u64,
            hidden: row.try_get("hidden")?,
            campaign_id: row.try_get("campaign_id")?,
            session_id: row.try_get("session_id")?,
        })
    }

    fn not_found(id: &CallId) -> DialEngineError {
        DialEngineError::not_found(format!("Call record not found: {}", id))
    }
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn insert(&self, record: CallRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO call_records
               (id, number, status, device_id, start_time, answered_at,
                duration_seconds, hidden, campaign_id, session_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.as_str())
        .bind(&record.number)
        .bind(record.status.as_str())
        .bind(record.device_id.as_ref().map(|d| d.to_string()))
        .bind(record.start_time)
        .bind(record.answered_at)
        .bind(record.duration_seconds as i64)
        .bind(record.hidden)
        .bind(&record.campaign_id)
        .bind(&record.session_id)
        .execute(&self.pool)
        .await?;
        debug!("Inserted call record {}", record.id);
        Ok(())
    }

    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>> {
        let row = sqlx::query("SELECT * FROM call_records WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    async fn update_status(
        &self,
        id: &CallId,
        status: CallStatus,
        duration_seconds: u64,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE call_records SET status = ?, duration_seconds = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(duration_seconds as i64)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn set_answered_at(&self, id: &CallId, at: DateTime<Utc>) -> Result<()> {
        // First write wins; a later write matches zero rows and that is fine
        sqlx::query("UPDATE call_records SET answered_at = ? WHERE id = ? AND answered_at IS NULL")
            .bind(at)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn non_terminal_for_device(
        &self,
        device_id: &DeviceId,
        session_id: Option<&str>,
    ) -> Result<Vec<CallRecord>> {
        let rows = match session_id {
            Some(session) => {
                sqlx::query(
                    r#"SELECT * FROM call_records
                       WHERE device_id = ? AND status != 'ended' AND session_id = ?"#,
                )
                .bind(device_id.to_string())
                .bind(session)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM call_records WHERE device_id = ? AND status != 'ended'",
                )
                .bind(device_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn set_hidden(&self, id: &CallId, hidden: bool) -> Result<()> {
        let result = sqlx::query("UPDATE call_records SET hidden = ? WHERE id = ?")
            .bind(hidden)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn delete(&self, ids: &[CallId]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM call_records WHERE id = ?")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected();
        }
        debug!("Deleted {} call record(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_round_trips_through_sqlite() {
        let store = SqliteCallStore::in_memory().await.unwrap();
        let record = CallRecord::queued("+15550000", Some(DeviceId::from("dev-1")))
            .with_campaign("camp-1", "sess-1");
        let id = record.id.clone();
        store.insert(record).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.number, "+15550000");
        assert_eq!(loaded.status, CallStatus::Queued);
        assert_eq!(loaded.device_id, Some(DeviceId::from("dev-1")));
        assert_eq!(loaded.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn answered_at_is_write_once_in_sql() {
        let store = SqliteCallStore::in_memory().await.unwrap();
        let record = CallRecord::queued("+15550000", None);
        let id = record.id.clone();
        store.insert(record).await.unwrap();

        let first = Utc::now();
        store.set_answered_at(&id, first).await.unwrap();
        store
            .set_answered_at(&id, first + chrono::Duration::seconds(30))
            .await
            .unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.answered_at, Some(first));
    }

    #[tokio::test]
    async fn update_of_missing_record_reports_not_found() {
        let store = SqliteCallStore::in_memory().await.unwrap();
        let err = store
            .update_status(&CallId::new(), CallStatus::Ended, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DialEngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn session_filter_narrows_the_sweep_query() {
        let store = SqliteCallStore::in_memory().await.unwrap();
        let dev = DeviceId::from("dev-1");
        let mut a = CallRecord::queued("+1", Some(dev.clone()));
        a.session_id = Some("sess-1".into());
        let mut b = CallRecord::queued("+2", Some(dev.clone()));
        b.session_id = Some("sess-2".into());
        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();

        let narrowed = store
            .non_terminal_for_device(&dev, Some("sess-1"))
            .await
            .unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].number, "+1");
    }
}
