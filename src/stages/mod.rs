//! Pipeline stages and their construction from a run configuration

pub mod cleaning;
pub mod download;
pub mod gate;
pub mod split;
pub mod train;

pub use cleaning::{clean, clean_with, BasicCleaningStage, CleaningRules};
pub use download::DownloadStage;
pub use gate::{validate, DataCheckStage, GateConfig, GateReport, ValidationFailure, ValidationIssue};
pub use regression_test::TestRegressionModelStage;
pub use split::{split, DataSplitStage, SplitError};
pub use train::{TrainRandomForestStage, TrainSettings};

use crate::{
    artifacts::{ArtifactError, ArtifactRef},
    core::{
        config::{ConfigError, RunConfig},
        context::RunContext,
        stage::{Stage, StageKind},
    },
};
use std::path::PathBuf;

/// Hyperparameter file written into the run work directory before training
pub const RF_CONFIG_FILE: &str = "rf_config.json";

/// Location of the run's `rf_config.json`
pub fn rf_config_path(ctx: &RunContext) -> PathBuf {
    ctx.work_dir().join(RF_CONFIG_FILE)
}

fn reference(field: &str, value: &str) -> Result<ArtifactRef, ConfigError> {
    ArtifactRef::parse(value).map_err(|e: ArtifactError| ConfigError::Invalid {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Build one stage, threading its slice of the configuration into it
pub fn build_stage(
    kind: StageKind,
    config: &RunConfig,
    ctx: &RunContext,
) -> Result<Box<dyn Stage>, ConfigError> {
    let modeling = &config.modeling;
    let stage: Box<dyn Stage> = match kind {
        StageKind::Download => Box::new(DownloadStage::new(config.etl.sample.clone())),
        StageKind::BasicCleaning => Box::new(BasicCleaningStage::from_config(config).map_err(|e| {
            ConfigError::Invalid {
                field: "basic_cleaning.input_artifact".to_string(),
                reason: e.to_string(),
            }
        })?),
        StageKind::DataCheck => {
            let candidate = ArtifactRef::latest(&config.basic_cleaning.output_artifact);
            let reference = match &config.data_check.reference_artifact {
                Some(value) => Some(reference("data_check.reference_artifact", value)?),
                None => None,
            };
            Box::new(DataCheckStage::new(
                candidate,
                reference,
                GateConfig::from_config(config),
            ))
        }
        StageKind::DataSplit => Box::new(DataSplitStage::new(
            ArtifactRef::latest(&config.basic_cleaning.output_artifact),
            modeling.test_size,
            modeling.random_seed,
            modeling.stratify_column().map(str::to_string),
        )),
        StageKind::TrainRandomForest => Box::new(TrainRandomForestStage::new(
            ArtifactRef::latest(split::TRAINVAL_ARTIFACT),
            rf_config_path(ctx),
            TrainSettings {
                val_size: modeling.val_size,
                random_seed: modeling.random_seed,
                stratify_by: modeling.stratify_column().map(str::to_string),
                max_tfidf_features: modeling.max_tfidf_features,
                output_artifact: modeling.output_artifact.clone(),
                columns: modeling.features.clone(),
            },
        )),
        StageKind::TestRegressionModel => {
            let test = &config.test_regression_model;
            Box::new(TestRegressionModelStage::new(
                reference("test_regression_model.model_artifact", &test.model_artifact)?,
                reference("test_regression_model.test_artifact", &test.test_artifact)?,
                test.min_r2,
            ))
        }
    };
    Ok(stage)
}

/// Build every stage in `kinds`, in the order given
pub fn build_stages(
    kinds: &[StageKind],
    config: &RunConfig,
    ctx: &RunContext,
) -> Result<Vec<Box<dyn Stage>>, ConfigError> {
    kinds
        .iter()
        .map(|kind| build_stage(*kind, config, ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const CONFIG: &str = r#"
main:
  project_name: nyc_airbnb
  experiment_name: development
etl:
  sample: sample1.csv
  min_price: 10
  max_price: 350
"#;

    #[test]
    fn test_stages_declare_the_artifact_chain() {
        let config = RunConfig::from_yaml(CONFIG).unwrap();
        let ctx = RunContext::new("nyc_airbnb", "development", Path::new("/tmp"));
        let stages = build_stages(&StageKind::MASTER_LIST, &config, &ctx).unwrap();

        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names[0], "download");
        assert_eq!(stages[0].outputs(), vec!["raw_data.csv"]);
        assert_eq!(stages[1].inputs(), vec![ArtifactRef::parse("raw_data.csv:latest").unwrap()]);
        assert_eq!(stages[1].outputs(), vec!["clean_sample.csv"]);
        // self-comparison: only the candidate is materialized
        assert_eq!(stages[2].inputs().len(), 1);
        assert_eq!(stages[3].outputs(), vec!["trainval_data.csv", "test_data.csv"]);
        assert_eq!(stages[4].outputs(), vec!["random_forest_export"]);
        assert_eq!(
            stages[5].inputs()[0],
            ArtifactRef::parse("random_forest_export:prod").unwrap()
        );
    }

    #[test]
    fn test_stage_params_come_from_config() {
        let overrides = vec![
            ("data_check.kl_threshold".to_string(), "0.5".to_string()),
            ("modeling.stratify_by".to_string(), "none".to_string()),
        ];
        let config = RunConfig::from_yaml_with_overrides(CONFIG, &overrides).unwrap();
        let ctx = RunContext::new("nyc_airbnb", "development", Path::new("/tmp"));

        let check = build_stage(StageKind::DataCheck, &config, &ctx).unwrap();
        assert_eq!(check.params().get("kl_threshold"), Some("0.5"));
        assert_eq!(check.params().get("min_price"), Some("10"));

        let split = build_stage(StageKind::DataSplit, &config, &ctx).unwrap();
        assert_eq!(split.params().get("stratify_by"), Some("none"));

        let train = build_stage(StageKind::TrainRandomForest, &config, &ctx).unwrap();
        let rf_config = train.params().get("rf_config").unwrap().to_string();
        assert!(rf_config.ends_with(RF_CONFIG_FILE));
    }
}
