//! SQLite-based run history store

use crate::persistence::{ExecutionStatus, RunStore, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

const COLUMNS: &str = "id, project, run_group, status, active_stages, failed_stage, error, \
                       started_at, completed_at, completed_stages, total_stages";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("rental-pipeline");
        std::fs::create_dir_all(&db_dir)?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                run_group TEXT NOT NULL,
                status TEXT NOT NULL,
                active_stages TEXT NOT NULL,
                failed_stage TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_runs_project ON runs(project);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.get("status");
        let active: String = row.get("active_stages");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            project: row.get("project"),
            run_group: row.get("run_group"),
            status: ExecutionStatus::parse(&status)
                .with_context(|| format!("Unknown run status '{}'", status))?,
            active_stages: active
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            failed_stage: row.get("failed_stage"),
            error: row.get("error"),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            completed_stages: row.get::<i64, _>("completed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, project, run_group, status, active_stages, failed_stage, error,
             started_at, completed_at, completed_stages, total_stages)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.project)
        .bind(&run.run_group)
        .bind(run.status.as_str())
        .bind(run.active_stages.join(","))
        .bind(&run.failed_stage)
        .bind(&run.error)
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.completed_stages as i64)
        .bind(run.total_stages as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, project: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match project {
            Some(project) => {
                sqlx::query(&format!(
                    "SELECT {} FROM runs WHERE project = ?1 ORDER BY started_at DESC LIMIT ?2",
                    COLUMNS
                ))
                .bind(project)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?1",
                    COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT project FROM runs ORDER BY project ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list projects")?;

        Ok(rows.iter().map(|row| row.get("project")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let store = SqliteRunStore::new(path.to_str().unwrap()).await.unwrap();

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            project: "nyc_airbnb".to_string(),
            run_group: "development".to_string(),
            status: ExecutionStatus::Failed,
            active_stages: vec!["download".to_string(), "data_check".to_string()],
            failed_stage: Some("data_check".to_string()),
            error: Some("1 check(s) failed".to_string()),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            completed_stages: 1,
            total_stages: 2,
        };

        store.save_run(&summary).await.unwrap();

        let loaded = store.load_run(summary.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.project, summary.project);
        assert_eq!(loaded.status, summary.status);
        assert_eq!(loaded.active_stages, summary.active_stages);
        assert_eq!(loaded.failed_stage, summary.failed_stage);

        let runs = store.list_runs(Some("nyc_airbnb"), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(store.list_runs(Some("other"), 10).await.unwrap().is_empty());
        assert_eq!(store.list_projects().await.unwrap(), vec!["nyc_airbnb"]);
    }
}
