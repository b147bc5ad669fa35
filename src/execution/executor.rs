//! Stage executor - materializes inputs, runs one stage, publishes outputs

use crate::{
    artifacts::{ArtifactStore, ArtifactVersion},
    core::{
        context::RunContext,
        error::PipelineError,
        stage::{Stage, StageError, StageInputs},
    },
};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Outcome of a successful stage invocation
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub summary: String,
    /// Versions published (or reused) for the stage's outputs, in order
    pub published: Vec<ArtifactVersion>,
}

/// Executes a single stage against an artifact store
pub struct StageExecutor {
    store: Arc<dyn ArtifactStore>,
    timeout: Duration,
}

impl StageExecutor {
    pub fn new(store: Arc<dyn ArtifactStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run one stage end to end. Every error carries the stage name.
    pub async fn execute(
        &self,
        stage: &dyn Stage,
        ctx: &RunContext,
    ) -> Result<ExecutionResult, PipelineError> {
        let name = stage.name();
        let params = stage.params();
        info!("Executing stage: {} [{}]", name, params);

        let mut inputs = StageInputs::new();
        for reference in stage.inputs() {
            let artifact = self
                .store
                .fetch(&reference)
                .await
                .map_err(|e| PipelineError::artifact(name, e))?;
            debug!("Materialized {} as {}", reference, artifact.meta.tag());
            inputs.insert(reference, artifact);
        }

        let output = match timeout(self.timeout, stage.run(ctx, &inputs)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(PipelineError::from_stage(name, params, e)),
            Err(_) => {
                return Err(PipelineError::from_stage(
                    name,
                    params,
                    StageError::Timeout(self.timeout.as_secs()),
                ))
            }
        };

        for declared in stage.outputs() {
            if !output.artifacts.iter().any(|draft| draft.name == declared) {
                return Err(PipelineError::from_stage(
                    name,
                    params,
                    StageError::MissingOutput(declared),
                ));
            }
        }

        let mut published = Vec::with_capacity(output.artifacts.len());
        for draft in output.artifacts {
            let version = self
                .store
                .publish(draft, Some(ctx.run_id()))
                .await
                .map_err(|e| PipelineError::artifact(name, e))?;
            info!("Published {} ({} bytes)", version.tag(), version.size_bytes);
            published.push(version);
        }

        Ok(ExecutionResult {
            summary: output.summary,
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::{ArtifactDraft, ArtifactRef, InMemoryArtifactStore},
        core::stage::{StageKind, StageOutput, StageParams},
    };
    use async_trait::async_trait;
    use std::path::Path;

    struct EchoStage {
        input: Option<ArtifactRef>,
        produce: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Stage for EchoStage {
        fn kind(&self) -> StageKind {
            StageKind::BasicCleaning
        }

        fn inputs(&self) -> Vec<ArtifactRef> {
            self.input.iter().cloned().collect()
        }

        fn outputs(&self) -> Vec<String> {
            vec!["echo.csv".to_string()]
        }

        fn params(&self) -> StageParams {
            StageParams::new().with("produce", self.produce)
        }

        async fn run(&self, _ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let output = StageOutput::new(format!("{} inputs", inputs.len()));
            if self.produce {
                Ok(output.with_artifact(ArtifactDraft::new("echo.csv", "echo", "", b"a\n1\n".to_vec())))
            } else {
                Ok(output)
            }
        }
    }

    fn ctx() -> RunContext {
        RunContext::new("p", "g", Path::new("/tmp"))
    }

    #[tokio::test]
    async fn test_outputs_are_published_with_run_id() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let executor = StageExecutor::new(store.clone(), Duration::from_secs(5));
        let ctx = ctx();
        let stage = EchoStage {
            input: None,
            produce: true,
            delay: None,
        };

        let result = executor.execute(&stage, &ctx).await.unwrap();
        assert_eq!(result.published.len(), 1);
        assert_eq!(result.published[0].run_id, Some(ctx.run_id()));
        assert!(store.resolve(&ArtifactRef::latest("echo.csv")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_input_is_an_artifact_error() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()), Duration::from_secs(5));
        let stage = EchoStage {
            input: Some(ArtifactRef::latest("raw_data.csv")),
            produce: true,
            delay: None,
        };
        let err = executor.execute(&stage, &ctx()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { ref stage, .. } if stage == "basic_cleaning"));
    }

    #[tokio::test]
    async fn test_undeclared_output_fails() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()), Duration::from_secs(5));
        let stage = EchoStage {
            input: None,
            produce: false,
            delay: None,
        };
        let err = executor.execute(&stage, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageExecution {
                source: StageError::MissingOutput(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_a_stage_error() {
        let executor = StageExecutor::new(Arc::new(InMemoryArtifactStore::new()), Duration::from_millis(20));
        let stage = EchoStage {
            input: None,
            produce: true,
            delay: Some(Duration::from_secs(5)),
        };
        let err = executor.execute(&stage, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageExecution {
                source: StageError::Timeout(_),
                ..
            }
        ));
    }
}
