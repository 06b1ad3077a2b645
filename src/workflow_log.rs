//! Durable per-workflow run log
//!
//! Append-only: a run is inserted as `running` and finalized exactly
//! once as `completed` or `failed`. Log mutations swallow their own
//! errors so observability failures never fail user-visible operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{info, warn};

/// Terminal and non-terminal run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

/// One persisted run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLogEntry {
    pub id: i64,
    pub project_id: String,
    pub workflow_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    pub input_params: Option<String>,
    pub output_summary: Option<String>,
    pub error_message: Option<String>,
}

/// Handle to one running workflow's log row
#[derive(Debug, Clone, Copy)]
pub struct WorkflowRun {
    pub id: i64,
}

/// Workflow log backed by the relational store
pub struct WorkflowLog {
    pool: SqlitePool,
}

impl WorkflowLog {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_workflow_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                workflow_type TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL,
                input_params TEXT,
                output_summary TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_workflow_project \
             ON agent_workflow_log(project_id, workflow_type, start_time)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert a `running` record. Returns `None` on failure; callers
    /// proceed without a log handle.
    pub async fn start(
        &self,
        project_id: &str,
        workflow_type: &str,
        input_params: &serde_json::Value,
    ) -> Option<WorkflowRun> {
        let result = sqlx::query(
            r#"
            INSERT INTO agent_workflow_log
                (project_id, workflow_type, start_time, status, input_params)
            VALUES (?, ?, ?, 'running', ?)
            "#,
        )
        .bind(project_id)
        .bind(workflow_type)
        .bind(Utc::now().to_rfc3339())
        .bind(input_params.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let id = done.last_insert_rowid();
                info!("Workflow {} started for {} (log #{})", workflow_type, project_id, id);
                Some(WorkflowRun { id })
            }
            Err(e) => {
                warn!("Workflow log start failed: {}", e);
                None
            }
        }
    }

    /// Finalize a run as completed with a compact output summary.
    /// Never raises back into the caller.
    pub async fn complete(&self, run: Option<WorkflowRun>, summary: &serde_json::Value) {
        let Some(run) = run else { return };
        let result = sqlx::query(
            "UPDATE agent_workflow_log \
             SET end_time = ?, status = 'completed', output_summary = ? \
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(summary.to_string())
        .bind(run.id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("Workflow log completion failed: {}", e);
        }
    }

    /// Finalize a run as failed; the message is truncated to 1000 chars
    pub async fn fail(&self, run: Option<WorkflowRun>, error: &str) {
        let Some(run) = run else { return };
        let message: String = error.chars().take(1000).collect();
        let result = sqlx::query(
            "UPDATE agent_workflow_log \
             SET end_time = ?, status = 'failed', error_message = ? \
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(message)
        .bind(run.id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("Workflow log failure update failed: {}", e);
        }
    }

    /// Read runs filtered by project, type and start-time range
    pub async fn query(
        &self,
        project_id: &str,
        workflow_type: Option<&str>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<WorkflowLogEntry>> {
        let mut sql = String::from(
            "SELECT id, project_id, workflow_type, start_time, end_time, status, \
                    input_params, output_summary, error_message \
             FROM agent_workflow_log WHERE project_id = ?",
        );
        if workflow_type.is_some() {
            sql.push_str(" AND workflow_type = ?");
        }
        if since.is_some() {
            sql.push_str(" AND start_time >= ?");
        }
        if until.is_some() {
            sql.push_str(" AND start_time <= ?");
        }
        sql.push_str(" ORDER BY start_time DESC");

        let mut query = sqlx::query(&sql).bind(project_id);
        if let Some(workflow_type) = workflow_type {
            query = query.bind(workflow_type);
        }
        if let Some(since) = since {
            query = query.bind(since.to_rfc3339());
        }
        if let Some(until) = until {
            query = query.bind(until.to_rfc3339());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let parse_time = |value: Option<String>| {
                value.and_then(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .ok()
                        .map(|d| d.with_timezone(&Utc))
                })
            };
            entries.push(WorkflowLogEntry {
                id: row.get("id"),
                project_id: row.get("project_id"),
                workflow_type: row.get("workflow_type"),
                start_time: parse_time(Some(row.get("start_time"))).unwrap_or_else(Utc::now),
                end_time: parse_time(row.get("end_time")),
                status: match status.as_str() {
                    "completed" => WorkflowStatus::Completed,
                    "failed" => WorkflowStatus::Failed,
                    _ => WorkflowStatus::Running,
                },
                input_params: row.get("input_params"),
                output_summary: row.get("output_summary"),
                error_message: row.get("error_message"),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_log() -> WorkflowLog {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        WorkflowLog::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_and_complete() {
        let log = test_log().await;
        let run = log
            .start("P001", "risk_analysis", &json!({"project_id": "P001"}))
            .await;
        assert!(run.is_some());

        log.complete(run, &json!({"total_risks": 3})).await;

        let entries = log.query("P001", None, None, None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, WorkflowStatus::Completed);
        assert!(entries[0].end_time.is_some());
        assert!(entries[0].output_summary.as_deref().unwrap().contains("total_risks"));
    }

    #[tokio::test]
    async fn test_fail_truncates_message() {
        let log = test_log().await;
        let run = log.start("P001", "weekly_report", &json!({})).await;

        let long_error = "x".repeat(5000);
        log.fail(run, &long_error).await;

        let entries = log.query("P001", Some("weekly_report"), None, None).await.unwrap();
        assert_eq!(entries[0].status, WorkflowStatus::Failed);
        assert_eq!(entries[0].error_message.as_deref().unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn test_finalize_without_handle_is_noop() {
        let log = test_log().await;
        // Must not panic or error
        log.complete(None, &json!({})).await;
        log.fail(None, "err").await;
    }

    #[tokio::test]
    async fn test_query_filters_by_type() {
        let log = test_log().await;
        let run_a = log.start("P001", "risk_analysis", &json!({})).await;
        let run_b = log.start("P001", "weekly_report", &json!({})).await;
        log.complete(run_a, &json!({})).await;
        log.complete(run_b, &json!({})).await;

        let risk_only = log
            .query("P001", Some("risk_analysis"), None, None)
            .await
            .unwrap();
        assert_eq!(risk_only.len(), 1);
        assert_eq!(risk_only[0].workflow_type, "risk_analysis");
    }
}
