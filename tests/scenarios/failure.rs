//! Test: Failure handling - the first failing stage aborts the run

use crate::helpers::*;
use rental_pipeline::{
    artifacts::{ArtifactRef, ArtifactStore, InMemoryArtifactStore},
    core::{ExecutionStatus, Pipeline, PipelineError, RunContext, StageError, StageKind, StageState},
    persistence::{create_summary, InMemoryRunStore, RunStore},
};
use std::sync::Arc;

#[tokio::test]
async fn test_missing_input_artifact() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _events) = recording_engine(store);

    let config = workspace.config("basic_cleaning", &[]);
    let err = engine.run(&config, &workspace.work_root()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Artifact { ref stage, .. } if stage == "basic_cleaning"));
}

#[tokio::test]
async fn test_failed_download_skips_the_rest_and_is_recorded() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store.clone());

    let missing = workspace.dir.path().join("missing.csv");
    let config = config_for(&missing, "all", &[]);
    let mut pipeline = Pipeline::from_config(&config).unwrap();
    let ctx = RunContext::from_config(&config, &workspace.work_root());

    let result = engine.execute(&mut pipeline, &config, &ctx).await;
    let err = result.as_ref().unwrap_err();
    assert_eq!(err.stage(), Some("download"));
    assert_eq!(started_stages(&events), vec![StageKind::Download]);
    assert!(matches!(
        pipeline.stage(StageKind::TrainRandomForest),
        Some(StageState::Skipped { reason }) if reason == "aborted after download failed"
    ));
    assert!(store.list_versions(None).await.unwrap().is_empty());

    let history = InMemoryRunStore::new();
    history
        .save_run(&create_summary(&pipeline, &ctx, result.as_ref().err()))
        .await
        .unwrap();
    let runs = history.list_runs(Some("nyc_airbnb"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, ExecutionStatus::Failed);
    assert_eq!(runs[0].failed_stage.as_deref(), Some("download"));
    assert_eq!(runs[0].run_group, "scenario");
    assert!(runs[0].error.is_some());
}

#[tokio::test]
async fn test_group_too_small_to_split() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _events) = recording_engine(store);

    let config = workspace.config(
        "download,basic_cleaning,data_split",
        &[("modeling.test_size", "0.01")],
    );
    let err = engine.run(&config, &workspace.work_root()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::StageExecution {
            source: StageError::Split(_),
            ..
        }
    ));
    assert_eq!(err.stage(), Some("data_split"));
}

#[tokio::test]
async fn test_regression_floor_fails_the_stage() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _events) = recording_engine(store.clone());

    let config = workspace.config("all", &[]);
    engine.run(&config, &workspace.work_root()).await.unwrap();
    store
        .set_alias(&ArtifactRef::latest("random_forest_export"), "prod")
        .await
        .unwrap();

    // R2 never exceeds 1
    let config = workspace.config(
        "test_regression_model",
        &[("test_regression_model.min_r2", "1.5")],
    );
    let err = engine.run(&config, &workspace.work_root()).await.unwrap_err();

    assert_eq!(err.stage(), Some("test_regression_model"));
    assert!(matches!(
        err,
        PipelineError::StageExecution {
            source: StageError::Failed(_),
            ..
        }
    ));
}
