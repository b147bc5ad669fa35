//! Run context - attribution and scratch space shared by every stage

use crate::core::{config::RunConfig, stage::StageKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identity of one pipeline invocation.
///
/// Built once before the first stage runs and handed to every stage by
/// reference. Fields are private so nothing can relabel a run midway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    run_id: Uuid,
    project: String,
    run_group: String,
    work_dir: PathBuf,
    started_at: DateTime<Utc>,
}

impl RunContext {
    /// Create a context with a fresh run id; `work_root` gets a per-run subdirectory
    pub fn new(project: impl Into<String>, run_group: impl Into<String>, work_root: &Path) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            project: project.into(),
            run_group: run_group.into(),
            work_dir: work_root.join(run_id.to_string()),
            started_at: Utc::now(),
        }
    }

    /// Project and run group come from `main.project_name` / `main.experiment_name`
    pub fn from_config(config: &RunConfig, work_root: &Path) -> Self {
        Self::new(
            config.main.project_name.clone(),
            config.main.experiment_name.clone(),
            work_root,
        )
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn run_group(&self) -> &str {
        &self.run_group
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Label used to attribute a stage's log lines and artifacts
    pub fn job_label(&self, stage: StageKind) -> String {
        format!("{}/{}/{}", self.project, self.run_group, stage)
    }

    /// Delete the run's scratch space; a directory that was never created
    /// is not an error
    pub async fn remove_work_dir(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Scratch directory for a single stage
    pub fn stage_dir(&self, stage: StageKind) -> PathBuf {
        self.work_dir.join(stage.name())
    }
}
