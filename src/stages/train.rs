//! Train the random-forest price model

use crate::{
    artifacts::{ArtifactDraft, ArtifactRef},
    core::{
        context::RunContext,
        stage::{Stage, StageError, StageInputs, StageKind, StageOutput, StageParams},
    },
    model::{self, FeatureColumns, ForestParams, TrainParams},
    stages::split::split,
};
use async_trait::async_trait;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub const MODEL_TYPE: &str = "model_export";

/// Sets its flag when dropped, so blocking work can notice that the
/// awaiting stage is gone
#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Training settings other than the forest hyperparameters, which are read
/// from `rf_config` at run time
#[derive(Debug, Clone)]
pub struct TrainSettings {
    pub val_size: f64,
    pub random_seed: u64,
    pub stratify_by: Option<String>,
    pub max_tfidf_features: usize,
    pub output_artifact: String,
    pub columns: FeatureColumns,
}

/// The `train_random_forest` stage
pub struct TrainRandomForestStage {
    trainval: ArtifactRef,
    rf_config: PathBuf,
    settings: TrainSettings,
}

impl TrainRandomForestStage {
    pub fn new(trainval: ArtifactRef, rf_config: impl Into<PathBuf>, settings: TrainSettings) -> Self {
        Self {
            trainval,
            rf_config: rf_config.into(),
            settings,
        }
    }

    async fn load_forest_params(&self) -> Result<ForestParams, StageError> {
        let bytes = tokio::fs::read(&self.rf_config).await.map_err(|e| {
            StageError::Failed(format!(
                "cannot read rf_config {}: {}",
                self.rf_config.display(),
                e
            ))
        })?;
        Ok(ForestParams::from_json(&bytes)?)
    }
}

#[async_trait]
impl Stage for TrainRandomForestStage {
    fn kind(&self) -> StageKind {
        StageKind::TrainRandomForest
    }

    fn inputs(&self) -> Vec<ArtifactRef> {
        vec![self.trainval.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.settings.output_artifact.clone()]
    }

    fn params(&self) -> StageParams {
        StageParams::new()
            .with("trainval_artifact", &self.trainval)
            .with("rf_config", self.rf_config.display())
            .with("val_size", self.settings.val_size)
            .with("random_seed", self.settings.random_seed)
            .with(
                "stratify_by",
                self.settings.stratify_by.as_deref().unwrap_or("none"),
            )
            .with("max_tfidf_features", self.settings.max_tfidf_features)
            .with("output_artifact", &self.settings.output_artifact)
    }

    async fn run(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let label = ctx.job_label(self.kind());
        let forest = self.load_forest_params().await?;
        let trainval = inputs.dataset(&self.trainval)?;

        let (train, validation) = split(
            &trainval,
            self.settings.val_size,
            self.settings.random_seed,
            self.settings.stratify_by.as_deref(),
        )?;
        tracing::info!(
            "[{}] Fitting {} trees on {} rows, validating on {}",
            label,
            forest.n_estimators,
            train.len(),
            validation.len()
        );

        let params = TrainParams {
            columns: self.settings.columns.clone(),
            forest,
            max_tfidf_features: self.settings.max_tfidf_features,
        };
        // A timed-out stage drops this future; the guard then stops the fit
        let cancel = CancelOnDrop::default();
        let flag = cancel.flag();
        let export = tokio::task::spawn_blocking(move || {
            model::train_model(&train, &validation, &params, &flag)
        })
        .await
        .map_err(|e| StageError::Failed(format!("training task panicked: {}", e)))??;

        let summary = match &export.validation {
            Some(metrics) => {
                tracing::info!(
                    "[{}] Validation R2 {:.4}, MAE {:.2}",
                    label,
                    metrics.r2,
                    metrics.mae
                );
                format!("R2 {:.4}, MAE {:.2} on {} rows", metrics.r2, metrics.mae, metrics.rows)
            }
            None => "trained without validation rows".to_string(),
        };

        let draft = ArtifactDraft::new(
            &self.settings.output_artifact,
            MODEL_TYPE,
            "Random Forest pipeline export",
            export.to_json_bytes()?,
        );
        Ok(StageOutput::new(summary).with_artifact(draft))
    }
}
