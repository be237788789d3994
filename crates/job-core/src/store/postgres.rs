//! PostgreSQL job store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::JobStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    NewTask, TargetRef, TargetState, TaskId, TaskNode, TaskSpec, TaskStatus, TaskUpdate,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_task (
    id                      BIGSERIAL PRIMARY KEY,
    kind                    TEXT NOT NULL,
    name                    TEXT NOT NULL DEFAULT '',
    status                  TEXT NOT NULL,
    created                 TIMESTAMPTZ NOT NULL,
    started                 TIMESTAMPTZ,
    finished                TIMESTAMPTZ,
    task_impact             INTEGER NOT NULL DEFAULT 0,
    execution_handle        TEXT,
    cancel_flag             BOOLEAN NOT NULL DEFAULT FALSE,
    job_explanation         TEXT NOT NULL DEFAULT '',
    result_output_location  TEXT,
    result_error_trace      TEXT NOT NULL DEFAULT '',
    args_used               JSONB NOT NULL DEFAULT '[]',
    cwd_used                TEXT,
    env_used                JSONB NOT NULL DEFAULT '{}',
    prerequisite_ids        JSONB NOT NULL DEFAULT '[]',
    spec                    JSONB NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS job_task_status_created_idx ON job_task (status, created);
CREATE TABLE IF NOT EXISTS job_target (
    target_kind  TEXT NOT NULL,
    target_id    BIGINT NOT NULL,
    last_run     TIMESTAMPTZ,
    last_status  TEXT,
    runs         BIGINT NOT NULL DEFAULT 0,
    failed_runs  BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (target_kind, target_id)
);
"#;

const TASK_COLUMNS: &str = r#"
    id, kind, name, status, created, started, finished, task_impact,
    execution_handle, cancel_flag, job_explanation, result_output_location,
    result_error_trace, args_used, cwd_used, env_used, prerequisite_ids, spec
"#;

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    kind: String,
    name: String,
    status: String,
    created: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    task_impact: i32,
    execution_handle: Option<String>,
    cancel_flag: bool,
    job_explanation: String,
    result_output_location: Option<String>,
    result_error_trace: String,
    args_used: Json<Vec<String>>,
    cwd_used: Option<String>,
    env_used: Json<BTreeMap<String, String>>,
    prerequisite_ids: Json<Vec<TaskId>>,
    spec: Json<TaskSpec>,
}

impl TryFrom<TaskRow> for TaskNode {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |reason: String| StoreError::Corrupt { id, reason };
        let kind = row.kind.parse().map_err(corrupt)?;
        let status = row.status.parse().map_err(corrupt)?;

        Ok(TaskNode {
            id: row.id,
            kind,
            name: row.name,
            status,
            created: row.created,
            started: row.started,
            finished: row.finished,
            task_impact: u32::try_from(row.task_impact).unwrap_or(0),
            execution_handle: row.execution_handle,
            cancel_flag: row.cancel_flag,
            job_explanation: row.job_explanation,
            result_output_location: row.result_output_location,
            result_error_trace: row.result_error_trace,
            args_used: row.args_used.0,
            cwd_used: row.cwd_used,
            env_used: row.env_used.0,
            prerequisite_ids: row.prerequisite_ids.0,
            spec: row.spec.0,
        })
    }
}

/// Job store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn list_active(&self) -> StoreResult<Vec<TaskNode>> {
        let statuses: Vec<&str> = TaskStatus::ACTIVE.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM job_task WHERE status = ANY($1) ORDER BY created ASC, id ASC",
            TASK_COLUMNS
        ))
        .bind(&statuses[..])
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskNode::try_from).collect()
    }

    async fn get(&self, id: TaskId) -> StoreResult<TaskNode> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM job_task WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        TaskNode::try_from(row)
    }

    async fn insert(&self, task: NewTask) -> StoreResult<TaskNode> {
        let created = task.created.unwrap_or_else(Utc::now);
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO job_task (kind, name, status, created, task_impact, spec)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(task.kind.as_str())
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(created)
        .bind(i32::try_from(task.task_impact).unwrap_or(i32::MAX))
        .bind(Json(&task.spec))
        .fetch_one(&self.pool)
        .await?;

        TaskNode::try_from(row)
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> StoreResult<TaskNode> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM job_task WHERE id = $1 FOR UPDATE",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut node = TaskNode::try_from(row)?;
        update.apply_to(&mut node)?;

        sqlx::query(
            r#"
            UPDATE job_task SET
                status = $2,
                created = $3,
                started = $4,
                finished = $5,
                execution_handle = $6,
                cancel_flag = $7,
                job_explanation = $8,
                result_output_location = $9,
                result_error_trace = $10,
                args_used = $11,
                cwd_used = $12,
                env_used = $13,
                prerequisite_ids = $14
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(node.status.as_str())
        .bind(node.created)
        .bind(node.started)
        .bind(node.finished)
        .bind(&node.execution_handle)
        .bind(node.cancel_flag)
        .bind(&node.job_explanation)
        .bind(&node.result_output_location)
        .bind(&node.result_error_trace)
        .bind(Json(&node.args_used))
        .bind(&node.cwd_used)
        .bind(Json(&node.env_used))
        .bind(Json(&node.prerequisite_ids))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(node)
    }

    async fn target_state(&self, target: TargetRef) -> StoreResult<Option<TargetState>> {
        let (kind, id) = target.key();
        let row: Option<(Option<DateTime<Utc>>, Option<String>, i64, i64)> = sqlx::query_as(
            r#"
            SELECT last_run, last_status, runs, failed_runs
            FROM job_target
            WHERE target_kind = $1 AND target_id = $2
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(last_run, last_status, runs, failed_runs)| TargetState {
            last_run,
            last_status: last_status.and_then(|s| s.parse().ok()),
            runs: runs.max(0) as u64,
            failed_runs: failed_runs.max(0) as u64,
        }))
    }

    async fn record_target_run(
        &self,
        target: TargetRef,
        status: TaskStatus,
        finished: DateTime<Utc>,
    ) -> StoreResult<TargetState> {
        let (kind, id) = target.key();
        let failed: i64 = if status == TaskStatus::Successful { 0 } else { 1 };
        let (runs, failed_runs): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO job_target (target_kind, target_id, last_run, last_status, runs, failed_runs)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (target_kind, target_id) DO UPDATE SET
                last_run = EXCLUDED.last_run,
                last_status = EXCLUDED.last_status,
                runs = job_target.runs + 1,
                failed_runs = job_target.failed_runs + EXCLUDED.failed_runs
            RETURNING runs, failed_runs
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(finished)
        .bind(status.as_str())
        .bind(failed)
        .fetch_one(&self.pool)
        .await?;

        Ok(TargetState {
            last_run: Some(finished),
            last_status: Some(status),
            runs: runs.max(0) as u64,
            failed_runs: failed_runs.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskKind;

    fn row(kind: &str, status: &str) -> TaskRow {
        TaskRow {
            id: 5,
            kind: kind.to_string(),
            name: "deploy".to_string(),
            status: status.to_string(),
            created: Utc::now(),
            started: None,
            finished: None,
            task_impact: 10,
            execution_handle: None,
            cancel_flag: false,
            job_explanation: String::new(),
            result_output_location: None,
            result_error_trace: String::new(),
            args_used: Json(vec![]),
            cwd_used: None,
            env_used: Json(BTreeMap::new()),
            prerequisite_ids: Json(vec![]),
            spec: Json(TaskSpec::default()),
        }
    }

    #[test]
    fn test_row_conversion() {
        let node = TaskNode::try_from(row("playbook_run", "waiting")).unwrap();
        assert_eq!(node.kind, TaskKind::PlaybookRun);
        assert_eq!(node.status, TaskStatus::Waiting);
        assert_eq!(node.task_impact, 10);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let err = TaskNode::try_from(row("workflow", "waiting")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { id: 5, .. }));
    }
}
