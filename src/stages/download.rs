//! Import the raw sample into the artifact store

use crate::{
    artifacts::ArtifactDraft,
    core::{
        context::RunContext,
        stage::{Stage, StageError, StageInputs, StageKind, StageOutput, StageParams},
    },
    data::Dataset,
};
use async_trait::async_trait;
use std::path::PathBuf;

pub const RAW_ARTIFACT: &str = "raw_data.csv";
pub const RAW_TYPE: &str = "raw_data";

/// The `download` stage. Reads a local CSV sample and publishes it unchanged.
pub struct DownloadStage {
    sample: PathBuf,
}

impl DownloadStage {
    pub fn new(sample: impl Into<PathBuf>) -> Self {
        Self {
            sample: sample.into(),
        }
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn kind(&self) -> StageKind {
        StageKind::Download
    }

    fn outputs(&self) -> Vec<String> {
        vec![RAW_ARTIFACT.to_string()]
    }

    fn params(&self) -> StageParams {
        StageParams::new()
            .with("sample", self.sample.display())
            .with("artifact_name", RAW_ARTIFACT)
            .with("artifact_type", RAW_TYPE)
    }

    async fn run(&self, ctx: &RunContext, _inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let payload = tokio::fs::read(&self.sample).await.map_err(|e| {
            StageError::Failed(format!("cannot read sample {}: {}", self.sample.display(), e))
        })?;

        // Reject files that are not CSV before they reach the store
        let rows = Dataset::from_csv_bytes(&payload)?.len();
        tracing::info!(
            "[{}] Imported {} rows from {}",
            ctx.job_label(self.kind()),
            rows,
            self.sample.display()
        );

        Ok(StageOutput::new(format!("{} raw rows", rows)).with_artifact(ArtifactDraft::new(
            RAW_ARTIFACT,
            RAW_TYPE,
            "Raw file as downloaded",
            payload,
        )))
    }
}
