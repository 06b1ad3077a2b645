//! Relational project store
//!
//! Boundary between the engine core and the relational database: rows
//! are mapped here into immutable record structs, and everything above
//! this module consumes only those records.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::error::Result;

/// Project master record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub project_name: String,
    pub project_type: String,
    pub project_manager: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub total_budget: f64,
    /// Overall progress in percent
    pub progress_rate: f64,
    /// Actual cost per contract value, used for benchmarking
    pub cost_rate: f64,
}

/// One scheduled task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub project_id: String,
    pub task_name: String,
    /// not_started | in_progress | completed | delayed
    pub status: String,
    pub planned_progress: f64,
    pub actual_progress: f64,
    pub is_critical_path: bool,
    pub planned_start: Option<NaiveDate>,
    pub planned_end: Option<NaiveDate>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Schedule Performance Index: actual / planned progress
    pub fn spi(&self) -> Option<f64> {
        if self.planned_progress > 0.0 {
            Some(self.actual_progress / self.planned_progress)
        } else {
            None
        }
    }

    /// Absolute progress variance in percentage points
    pub fn variance(&self) -> f64 {
        self.actual_progress - self.planned_progress
    }
}

/// One cost line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub cost_id: String,
    pub project_id: String,
    /// material | labor | equipment | subcontract
    pub cost_category: String,
    pub cost_item: String,
    pub planned_amount: f64,
    pub actual_amount: f64,
    pub cost_date: Option<NaiveDate>,
}

impl CostRecord {
    pub fn variance(&self) -> f64 {
        self.actual_amount - self.planned_amount
    }

    /// Relative variance in percent of the planned amount
    pub fn variance_rate(&self) -> f64 {
        if self.planned_amount > 0.0 {
            self.variance() / self.planned_amount * 100.0
        } else {
            0.0
        }
    }
}

/// One safety check / defect record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyRecord {
    pub record_id: String,
    pub project_id: String,
    pub check_date: NaiveDate,
    /// pass | fail
    pub result: String,
    pub defect_type: Option<String>,
    /// high | medium | low
    pub defect_level: Option<String>,
    /// open | closed
    pub status: String,
    pub closed_date: Option<NaiveDate>,
    pub description: Option<String>,
}

impl SafetyRecord {
    /// Days the defect has been (or was) open, relative to `as_of`
    pub fn days_open(&self, as_of: NaiveDate) -> i64 {
        let end = self.closed_date.unwrap_or(as_of);
        (end - self.check_date).num_days().max(0)
    }
}

/// Document ingestion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            _ => DocumentStatus::Pending,
        }
    }
}

/// A processed source artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    /// regulation | project | contract | drawing | other
    pub doc_type: String,
    pub permission_level: i64,
    pub project_id: Option<String>,
    pub source_path: Option<String>,
    pub status: DocumentStatus,
    pub total_chunks: i64,
    pub vector_collection: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A retrievable unit of text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    /// Dense, 0-based per document
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
    pub page_num: Option<i64>,
    pub vector_id: Option<i64>,
    pub vector_collection: Option<String>,
}

/// Relational reads and ingestion writes used by the engine core
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    async fn upsert_project(&self, project: &ProjectRecord) -> Result<()>;

    /// Projects of the same type, excluding the given id
    async fn similar_projects(
        &self,
        project_type: &str,
        exclude_project_id: &str,
    ) -> Result<Vec<ProjectRecord>>;

    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>>;

    async fn critical_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>>;

    async fn upsert_task(&self, task: &TaskRecord) -> Result<()>;

    async fn costs_by_project(
        &self,
        project_id: &str,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Vec<CostRecord>>;

    async fn upsert_cost(&self, cost: &CostRecord) -> Result<()>;

    async fn safety_records(
        &self,
        project_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<SafetyRecord>>;

    async fn insert_safety_record(&self, record: &SafetyRecord) -> Result<()>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>>;

    async fn upsert_document(&self, document: &DocumentRecord) -> Result<()>;

    async fn update_document_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        total_chunks: Option<i64>,
    ) -> Result<()>;

    /// Replace a document's chunks atomically
    async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()>;

    async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>>;

    async fn all_chunks(&self) -> Result<Vec<ChunkRecord>>;

    /// Delete a document and its chunks
    async fn delete_document(&self, document_id: &str) -> Result<()>;
}

/// SQLite-backed store
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    pub async fn new(url: &str, pool_size: u32) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Project store initialized at {}", url);
        Ok(store)
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                project_name TEXT NOT NULL,
                project_type TEXT NOT NULL DEFAULT '',
                project_manager TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                start_date TEXT,
                planned_end_date TEXT,
                total_budget REAL NOT NULL DEFAULT 0,
                progress_rate REAL NOT NULL DEFAULT 0,
                cost_rate REAL NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'not_started',
                planned_progress REAL NOT NULL DEFAULT 0,
                actual_progress REAL NOT NULL DEFAULT 0,
                is_critical_path INTEGER NOT NULL DEFAULT 0,
                planned_start TEXT,
                planned_end TEXT,
                updated_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS costs (
                cost_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                cost_category TEXT NOT NULL,
                cost_item TEXT NOT NULL,
                planned_amount REAL NOT NULL DEFAULT 0,
                actual_amount REAL NOT NULL DEFAULT 0,
                cost_date TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS safety_records (
                record_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                check_date TEXT NOT NULL,
                result TEXT NOT NULL,
                defect_type TEXT,
                defect_level TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                closed_date TEXT,
                description TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                permission_level INTEGER NOT NULL DEFAULT 1,
                project_id TEXT,
                source_path TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                total_chunks INTEGER NOT NULL DEFAULT 0,
                vector_collection TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                page_num INTEGER,
                vector_id INTEGER,
                vector_collection TEXT,
                UNIQUE(document_id, chunk_index)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_costs_project ON costs(project_id, cost_date)",
            "CREATE INDEX IF NOT EXISTS idx_safety_project ON safety_records(project_id, check_date)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn date_to_string(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::from_str(&s).ok())
}

fn parse_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    })
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> ProjectRecord {
    ProjectRecord {
        project_id: row.get("project_id"),
        project_name: row.get("project_name"),
        project_type: row.get("project_type"),
        project_manager: row.get("project_manager"),
        status: row.get("status"),
        start_date: parse_date(row.get("start_date")),
        planned_end_date: parse_date(row.get("planned_end_date")),
        total_budget: row.get("total_budget"),
        progress_rate: row.get("progress_rate"),
        cost_rate: row.get("cost_rate"),
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> TaskRecord {
    TaskRecord {
        task_id: row.get("task_id"),
        project_id: row.get("project_id"),
        task_name: row.get("task_name"),
        status: row.get("status"),
        planned_progress: row.get("planned_progress"),
        actual_progress: row.get("actual_progress"),
        is_critical_path: row.get::<i64, _>("is_critical_path") != 0,
        planned_start: parse_date(row.get("planned_start")),
        planned_end: parse_date(row.get("planned_end")),
        updated_at: parse_datetime(row.get("updated_at")),
    }
}

fn cost_from_row(row: &sqlx::sqlite::SqliteRow) -> CostRecord {
    CostRecord {
        cost_id: row.get("cost_id"),
        project_id: row.get("project_id"),
        cost_category: row.get("cost_category"),
        cost_item: row.get("cost_item"),
        planned_amount: row.get("planned_amount"),
        actual_amount: row.get("actual_amount"),
        cost_date: parse_date(row.get("cost_date")),
    }
}

fn safety_from_row(row: &sqlx::sqlite::SqliteRow) -> SafetyRecord {
    SafetyRecord {
        record_id: row.get("record_id"),
        project_id: row.get("project_id"),
        check_date: parse_date(Some(row.get("check_date")))
            .unwrap_or_else(|| Utc::now().date_naive()),
        result: row.get("result"),
        defect_type: row.get("defect_type"),
        defect_level: row.get("defect_level"),
        status: row.get("status"),
        closed_date: parse_date(row.get("closed_date")),
        description: row.get("description"),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        name: row.get("name"),
        doc_type: row.get("doc_type"),
        permission_level: row.get("permission_level"),
        project_id: row.get("project_id"),
        source_path: row.get("source_path"),
        status: DocumentStatus::parse(&row.get::<String, _>("status")),
        total_chunks: row.get("total_chunks"),
        vector_collection: row.get("vector_collection"),
        created_at: parse_datetime(Some(row.get("created_at"))).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(Some(row.get("updated_at"))).unwrap_or_else(Utc::now),
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkRecord {
    ChunkRecord {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        token_count: row.get("token_count"),
        page_num: row.get("page_num"),
        vector_id: row.get("vector_id"),
        vector_collection: row.get("vector_collection"),
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query("SELECT * FROM projects WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| project_from_row(&r)))
    }

    async fn upsert_project(&self, project: &ProjectRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO projects
                (project_id, project_name, project_type, project_manager, status,
                 start_date, planned_end_date, total_budget, progress_rate, cost_rate)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.project_id)
        .bind(&project.project_name)
        .bind(&project.project_type)
        .bind(&project.project_manager)
        .bind(&project.status)
        .bind(date_to_string(project.start_date))
        .bind(date_to_string(project.planned_end_date))
        .bind(project.total_budget)
        .bind(project.progress_rate)
        .bind(project.cost_rate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn similar_projects(
        &self,
        project_type: &str,
        exclude_project_id: &str,
    ) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM projects \
             WHERE project_type = ? AND project_id != ? \
               AND status IN ('completed', 'active')",
        )
        .bind(project_type)
        .bind(exclude_project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn tasks_by_project(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE project_id = ? ORDER BY task_id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn critical_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE project_id = ? AND is_critical_path = 1 ORDER BY task_id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    async fn upsert_task(&self, task: &TaskRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tasks
                (task_id, project_id, task_name, status, planned_progress,
                 actual_progress, is_critical_path, planned_start, planned_end, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.project_id)
        .bind(&task.task_name)
        .bind(&task.status)
        .bind(task.planned_progress)
        .bind(task.actual_progress)
        .bind(task.is_critical_path as i64)
        .bind(date_to_string(task.planned_start))
        .bind(date_to_string(task.planned_end))
        .bind(task.updated_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn costs_by_project(
        &self,
        project_id: &str,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Vec<CostRecord>> {
        let mut sql = String::from("SELECT * FROM costs WHERE project_id = ?");
        if since.is_some() {
            sql.push_str(" AND cost_date >= ?");
        }
        if until.is_some() {
            sql.push_str(" AND cost_date <= ?");
        }
        sql.push_str(" ORDER BY cost_date, cost_id");

        let mut query = sqlx::query(&sql).bind(project_id);
        if let Some(since) = since {
            query = query.bind(since.to_string());
        }
        if let Some(until) = until {
            query = query.bind(until.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(cost_from_row).collect())
    }

    async fn upsert_cost(&self, cost: &CostRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO costs
                (cost_id, project_id, cost_category, cost_item,
                 planned_amount, actual_amount, cost_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cost.cost_id)
        .bind(&cost.project_id)
        .bind(&cost.cost_category)
        .bind(&cost.cost_item)
        .bind(cost.planned_amount)
        .bind(cost.actual_amount)
        .bind(date_to_string(cost.cost_date))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn safety_records(
        &self,
        project_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<SafetyRecord>> {
        let mut sql = String::from("SELECT * FROM safety_records WHERE project_id = ?");
        if since.is_some() {
            sql.push_str(" AND check_date >= ?");
        }
        sql.push_str(" ORDER BY check_date, record_id");

        let mut query = sqlx::query(&sql).bind(project_id);
        if let Some(since) = since {
            query = query.bind(since.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(safety_from_row).collect())
    }

    async fn insert_safety_record(&self, record: &SafetyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO safety_records
                (record_id, project_id, check_date, result, defect_type,
                 defect_level, status, closed_date, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.project_id)
        .bind(record.check_date.to_string())
        .bind(&record.result)
        .bind(&record.defect_type)
        .bind(&record.defect_level)
        .bind(&record.status)
        .bind(date_to_string(record.closed_date))
        .bind(&record.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| document_from_row(&r)))
    }

    async fn upsert_document(&self, document: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents
                (id, name, doc_type, permission_level, project_id, source_path,
                 status, total_chunks, vector_collection, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.name)
        .bind(&document.doc_type)
        .bind(document.permission_level)
        .bind(&document.project_id)
        .bind(&document.source_path)
        .bind(document.status.as_str())
        .bind(document.total_chunks)
        .bind(&document.vector_collection)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_document_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        total_chunks: Option<i64>,
    ) -> Result<()> {
        match total_chunks {
            Some(total) => {
                sqlx::query(
                    "UPDATE documents SET status = ?, total_chunks = ?, updated_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(total)
                .bind(Utc::now().to_rfc3339())
                .bind(document_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(Utc::now().to_rfc3339())
                    .bind(document_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, text, token_count,
                     page_num, vector_id, vector_collection)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(chunk.page_num)
            .bind(chunk.vector_id)
            .bind(&chunk.vector_collection)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn all_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query("SELECT * FROM chunks ORDER BY document_id, chunk_index")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn sample_project(project_id: &str) -> ProjectRecord {
        ProjectRecord {
            project_id: project_id.to_string(),
            project_name: "测试项目".to_string(),
            project_type: "住宅".to_string(),
            project_manager: "王工".to_string(),
            status: "active".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            planned_end_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            total_budget: 1_000_000.0,
            progress_rate: 40.0,
            cost_rate: 0.5,
        }
    }

    #[tokio::test]
    async fn test_project_round_trip() {
        let store = SqliteProjectStore::in_memory().await.unwrap();
        store.upsert_project(&sample_project("P001")).await.unwrap();

        let project = store.get_project("P001").await.unwrap().unwrap();
        assert_eq!(project.project_name, "测试项目");
        assert_eq!(project.total_budget, 1_000_000.0);
        assert!(store.get_project("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_spi_derivation() {
        let task = TaskRecord {
            task_id: "T1".to_string(),
            project_id: "P001".to_string(),
            task_name: "土方开挖".to_string(),
            status: "in_progress".to_string(),
            planned_progress: 50.0,
            actual_progress: 40.0,
            is_critical_path: true,
            planned_start: None,
            planned_end: None,
            updated_at: None,
        };
        assert_eq!(task.spi(), Some(0.8));
        assert_eq!(task.variance(), -10.0);

        let unplanned = TaskRecord {
            planned_progress: 0.0,
            ..task
        };
        assert_eq!(unplanned.spi(), None);
    }

    #[tokio::test]
    async fn test_cost_variance_rate() {
        let cost = CostRecord {
            cost_id: "C1".to_string(),
            project_id: "P001".to_string(),
            cost_category: "material".to_string(),
            cost_item: "钢筋采购".to_string(),
            planned_amount: 100.0,
            actual_amount: 120.0,
            cost_date: None,
        };
        assert_eq!(cost.variance_rate(), 20.0);
    }

    #[tokio::test]
    async fn test_safety_days_open() {
        let record = SafetyRecord {
            record_id: "S1".to_string(),
            project_id: "P001".to_string(),
            check_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            result: "fail".to_string(),
            defect_type: Some("临边防护缺失".to_string()),
            defect_level: Some("high".to_string()),
            status: "open".to_string(),
            closed_date: None,
            description: None,
        };
        let as_of = NaiveDate::from_ymd_opt(2026, 7, 10).unwrap();
        assert_eq!(record.days_open(as_of), 9);
    }

    #[tokio::test]
    async fn test_chunk_replace_is_atomic_per_document() {
        let store = SqliteProjectStore::in_memory().await.unwrap();
        let chunk = |i: i64| ChunkRecord {
            id: format!("c{}", i),
            document_id: "d1".to_string(),
            chunk_index: i,
            text: format!("chunk {}", i),
            token_count: 2,
            page_num: None,
            vector_id: None,
            vector_collection: None,
        };

        store.replace_chunks("d1", &[chunk(0), chunk(1)]).await.unwrap();
        assert_eq!(store.chunks_by_document("d1").await.unwrap().len(), 2);

        store.replace_chunks("d1", &[chunk(0)]).await.unwrap();
        let chunks = store.chunks_by_document("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_document_cascade_delete() {
        let store = SqliteProjectStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .upsert_document(&DocumentRecord {
                id: "d1".to_string(),
                name: "图纸.pdf".to_string(),
                doc_type: "drawing".to_string(),
                permission_level: 1,
                project_id: Some("P001".to_string()),
                source_path: None,
                status: DocumentStatus::Pending,
                total_chunks: 0,
                vector_collection: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        store
            .replace_chunks(
                "d1",
                &[ChunkRecord {
                    id: "c1".to_string(),
                    document_id: "d1".to_string(),
                    chunk_index: 0,
                    text: "text".to_string(),
                    token_count: 1,
                    page_num: None,
                    vector_id: None,
                    vector_collection: None,
                }],
            )
            .await
            .unwrap();

        store.delete_document("d1").await.unwrap();
        assert!(store.get_document("d1").await.unwrap().is_none());
        assert!(store.chunks_by_document("d1").await.unwrap().is_empty());
    }
}
