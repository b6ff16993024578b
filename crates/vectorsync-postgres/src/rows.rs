use chrono::{DateTime, Utc};
use uuid::Uuid;
use vectorsync_core::JobStatus;

/// Work-queue row as read back from the database (runtime-checked, since
/// the table is created by the installer rather than by a migration file).
#[derive(Debug, Clone)]
pub struct WorkQueueRow {
    pub id: i64,
    pub doc_id: String,
    pub vector_clock: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<Uuid>,
    pub error: Option<String>,
    pub retry_count: i32,
}

impl WorkQueueRow {
    pub fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let status_str: String = row.try_get("status")?;
        let status = status_str
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(WorkQueueRow {
            id: row.try_get("id")?,
            doc_id: row.try_get("doc_id")?,
            vector_clock: row.try_get("vector_clock")?,
            status,
            created_at: row.try_get("created_at")?,
            processing_started_at: row.try_get("processing_started_at")?,
            completed_at: row.try_get("completed_at")?,
            worker_id: row.try_get("worker_id")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
        })
    }
}
