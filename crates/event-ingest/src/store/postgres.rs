//! PostgreSQL event store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_core::{StoreError, StoreResult, TaskId};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::EventStore;
use crate::model::{EventId, EventKind, ExecutionEvent, NewEvent};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_event (
    id          BIGSERIAL PRIMARY KEY,
    job_id      BIGINT NOT NULL,
    counter     BIGINT NOT NULL,
    event       TEXT NOT NULL,
    event_data  JSONB NOT NULL DEFAULT '{}',
    host        TEXT,
    parent_id   BIGINT REFERENCES job_event (id),
    failed      BOOLEAN NOT NULL DEFAULT FALSE,
    created     TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS job_event_job_counter_idx ON job_event (job_id, counter);
"#;

const EVENT_COLUMNS: &str = "id, job_id, counter, event, event_data, host, parent_id, failed, created";

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    job_id: i64,
    counter: i64,
    event: String,
    event_data: Json<serde_json::Value>,
    host: Option<String>,
    parent_id: Option<i64>,
    failed: bool,
    created: DateTime<Utc>,
}

impl From<EventRow> for ExecutionEvent {
    fn from(row: EventRow) -> Self {
        ExecutionEvent {
            id: row.id,
            job_id: row.job_id,
            counter: u64::try_from(row.counter).unwrap_or(0),
            kind: EventKind::from(row.event),
            event_data: row.event_data.0,
            host: row.host,
            parent_id: row.parent_id,
            failed: row.failed,
            created: row.created,
        }
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, event: NewEvent) -> StoreResult<ExecutionEvent> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO job_event (job_id, counter, event, event_data, host, parent_id, failed, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(event.job_id)
        .bind(i64::try_from(event.counter).unwrap_or(i64::MAX))
        .bind(event.kind.as_str())
        .bind(Json(&event.event_data))
        .bind(&event.host)
        .bind(event.parent_id)
        .bind(event.failed)
        .bind(event.created)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn mark_failed(&self, id: EventId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE job_event SET failed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_for_job(&self, job_id: TaskId) -> StoreResult<Vec<ExecutionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM job_event WHERE job_id = $1 ORDER BY counter ASC, id ASC",
            EVENT_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ExecutionEvent::from).collect())
    }
}
