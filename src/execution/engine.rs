//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    artifacts::{ArtifactStore, ArtifactVersion},
    core::{
        config::RunConfig,
        context::RunContext,
        error::PipelineError,
        pipeline::Pipeline,
        stage::{Stage, StageError, StageKind, StageParams},
        state::{ExecutionStatus, StageState},
    },
    execution::executor::StageExecutor,
    stages::{self, rf_config_path},
};
use chrono::Utc;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        project: String,
        run_group: String,
        stages: Vec<StageKind>,
    },
    StageStarted {
        stage: StageKind,
        index: usize,
        total: usize,
    },
    StageSkipped {
        stage: StageKind,
        reason: String,
    },
    StageCompleted {
        stage: StageKind,
        summary: String,
        outputs: Vec<String>,
    },
    StageFailed {
        stage: StageKind,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Everything a finished run leaves behind
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: Pipeline,
    pub context: RunContext,
    /// Every version published during the run, in publication order
    pub published: Vec<ArtifactVersion>,
}

impl RunReport {
    pub fn run_id(&self) -> Uuid {
        self.context.run_id()
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    store: Arc<dyn ArtifactStore>,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            event_handlers: Vec::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Plan and execute a run. Selector and configuration errors surface
    /// here, before any stage executes.
    pub async fn run(&self, config: &RunConfig, work_root: &Path) -> Result<RunReport, PipelineError> {
        let mut pipeline = Pipeline::from_config(config)?;
        let context = RunContext::from_config(config, work_root);
        let published = self.execute(&mut pipeline, config, &context).await?;
        Ok(RunReport {
            pipeline,
            context,
            published,
        })
    }

    /// Execute the active stages of `pipeline` under `ctx`.
    ///
    /// The pipeline is updated in place, so the caller still sees per-stage
    /// state when this returns an error.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        config: &RunConfig,
        ctx: &RunContext,
    ) -> Result<Vec<ArtifactVersion>, PipelineError> {
        let stages = stages::build_stages(pipeline.execution_order(), config, ctx)?;

        tokio::fs::create_dir_all(ctx.work_dir())
            .await
            .map_err(|e| {
                PipelineError::from_stage(
                    "run",
                    StageParams::new().with("work_dir", ctx.work_dir().display()),
                    StageError::Io(e),
                )
            })?;

        if pipeline.is_active(StageKind::TrainRandomForest) {
            let path = write_rf_config(config, ctx).await.map_err(|e| {
                PipelineError::from_stage(
                    StageKind::TrainRandomForest.name(),
                    StageParams::new().with("rf_config", rf_config_path(ctx).display()),
                    e,
                )
            })?;
            info!("Wrote forest hyperparameters to {}", path.display());
        }

        let timeout = Duration::from_secs(config.main.stage_timeout_secs);
        self.execute_with(pipeline, ctx, stages, timeout).await
    }

    /// Run prepared stages sequentially, in master-list order, stopping at
    /// the first failure.
    pub async fn execute_with(
        &self,
        pipeline: &mut Pipeline,
        ctx: &RunContext,
        mut stages: Vec<Box<dyn Stage>>,
        timeout: Duration,
    ) -> Result<Vec<ArtifactVersion>, PipelineError> {
        stages.sort_by_key(|stage| stage.kind().ordinal());
        let run_id = ctx.run_id();
        let executor = StageExecutor::new(self.store.clone(), timeout);

        info!(
            "Starting run {} for {}/{}",
            run_id,
            ctx.project(),
            ctx.run_group()
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            project: ctx.project().to_string(),
            run_group: ctx.run_group().to_string(),
            stages: pipeline.execution_order().to_vec(),
        });
        pipeline.state.start(run_id, pipeline.execution_order().len());

        let total = stages.len();
        let mut published = Vec::new();

        for (index, stage) in stages.iter().enumerate() {
            let kind = stage.kind();
            if !pipeline.is_active(kind) {
                warn!("Stage {} is not selected for this run, skipping", kind);
                self.emit_event(ExecutionEvent::StageSkipped {
                    stage: kind,
                    reason: "not selected".to_string(),
                });
                continue;
            }

            let started_at = Utc::now();
            pipeline.set_stage_state(kind, StageState::Running { started_at });
            self.emit_event(ExecutionEvent::StageStarted {
                stage: kind,
                index: index + 1,
                total,
            });

            match executor.execute(stage.as_ref(), ctx).await {
                Ok(result) => {
                    let outputs: Vec<String> = result.published.iter().map(|v| v.tag()).collect();
                    info!("Stage {} completed: {}", kind, result.summary);
                    pipeline.set_stage_state(
                        kind,
                        StageState::Completed {
                            summary: result.summary.clone(),
                            outputs: outputs.clone(),
                            started_at,
                            completed_at: Utc::now(),
                        },
                    );
                    pipeline.state.stage_completed();
                    published.extend(result.published);
                    self.emit_event(ExecutionEvent::StageCompleted {
                        stage: kind,
                        summary: result.summary,
                        outputs,
                    });
                }
                Err(e) => {
                    error!("Stage {} failed: {}", kind, e);
                    pipeline.set_stage_state(
                        kind,
                        StageState::Failed {
                            error: e.to_string(),
                            started_at,
                            failed_at: Utc::now(),
                        },
                    );
                    pipeline.state.fail(kind.name());
                    pipeline.skip_remaining(&format!("aborted after {} failed", kind));
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage: kind,
                        error: e.to_string(),
                    });
                    self.emit_event(ExecutionEvent::RunCompleted {
                        run_id,
                        status: ExecutionStatus::Failed,
                    });
                    return Err(e);
                }
            }
        }

        // Active stages that had no prepared stage never ran
        pipeline.skip_remaining("not scheduled");
        pipeline.state.complete();
        info!("Run {} completed", run_id);
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id,
            status: ExecutionStatus::Completed,
        });

        Ok(published)
    }
}

/// Serialize `modeling.random_forest` into the run work directory
async fn write_rf_config(config: &RunConfig, ctx: &RunContext) -> Result<PathBuf, StageError> {
    let path = rf_config_path(ctx);
    let json = serde_json::to_vec_pretty(&config.modeling.random_forest)
        .map_err(|e| StageError::Failed(format!("cannot serialize rf_config: {}", e)))?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}
