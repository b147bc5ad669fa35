//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Pipeline, PipelineError, RunContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id shared by every artifact the run published
    pub run_id: Uuid,

    pub project: String,

    pub run_group: String,

    /// Run status
    pub status: ExecutionStatus,

    /// Active stages, in execution order
    pub active_stages: Vec<String>,

    /// Stage that aborted the run, if any
    pub failed_stage: Option<String>,

    /// Error message of the aborting failure
    pub error: Option<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed or failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of completed stages
    pub completed_stages: usize,

    /// Number of active stages
    pub total_stages: usize,
}

impl RunSummary {
    /// Progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

/// Trait for run history backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by id
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally restricted to one project
    async fn list_runs(&self, project: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// All project names with recorded runs
    async fn list_projects(&self) -> Result<Vec<String>>;
}

/// In-memory run history (for testing or `--no-history`)
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, project: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| project.map_or(true, |p| run.project == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut projects: Vec<String> = runs.values().map(|run| run.project.clone()).collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }
}

/// Create a summary from a pipeline and the context it ran under
pub fn create_summary(
    pipeline: &Pipeline,
    ctx: &RunContext,
    error: Option<&PipelineError>,
) -> RunSummary {
    RunSummary {
        run_id: ctx.run_id(),
        project: ctx.project().to_string(),
        run_group: ctx.run_group().to_string(),
        status: pipeline.state.status,
        active_stages: pipeline
            .execution_order()
            .iter()
            .map(|kind| kind.name().to_string())
            .collect(),
        failed_stage: pipeline.state.failed_stage.clone(),
        error: error.map(|e| e.to_string()),
        started_at: pipeline.state.started_at.unwrap_or_else(|| ctx.started_at()),
        completed_at: pipeline.state.completed_at,
        completed_stages: pipeline.state.completed_stages,
        total_stages: pipeline.state.total_stages,
    }
}
