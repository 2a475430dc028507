//! SQLite-backed job store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::store::JobStore;
use crate::domain::Job;
use crate::{Error, Result};

/// Stores each job as a JSON document plus a few indexed columns.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let payload: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&payload)?)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, content_id, status, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_id = excluded.content_id,
                status = excluded.status,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(job.content_id())
        .bind(job.status.as_str())
        .bind(payload)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let row = sqlx::query("SELECT payload FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))?;
        decode(&row)
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT payload FROM jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", id));
        }
        Ok(())
    }
}
