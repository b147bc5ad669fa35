//! Test: End to end - download through training on the 20-row sample

use crate::helpers::*;
use rental_pipeline::{
    artifacts::{ArtifactDraft, ArtifactRef, ArtifactStore, InMemoryArtifactStore, LocalArtifactStore},
    core::{ExecutionStatus, PipelineError, StageKind, StageState},
    data::Dataset,
    execution::ExecutionEngine,
    stages::RF_CONFIG_FILE,
};
use std::sync::Arc;

#[tokio::test]
async fn test_cleaning_drops_outliers_and_incomplete_rows() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store.clone());

    let config = workspace.config("download,basic_cleaning", &[]);
    let report = engine.run(&config, &workspace.work_root()).await.unwrap();

    assert_eq!(
        started_stages(&events),
        vec![StageKind::Download, StageKind::BasicCleaning]
    );
    assert_eq!(report.pipeline.state.status, ExecutionStatus::Completed);

    let raw = latest_dataset(store.as_ref(), "raw_data.csv").await;
    assert_eq!(raw.len(), 20);

    let clean = latest_dataset(store.as_ref(), "clean_sample.csv").await;
    assert_eq!(clean.len(), 17);
    for price in clean.numeric_column("price").unwrap() {
        let price = price.unwrap();
        assert!((10.0..=350.0).contains(&price));
    }
    assert!(clean.rows().iter().all(|row| row.iter().all(Option::is_some)));

    let clean_version = store
        .resolve(&ArtifactRef::latest("clean_sample.csv"))
        .await
        .unwrap();
    assert_eq!(clean_version.artifact_type, "clean_data");
    assert_eq!(clean_version.run_id, Some(report.run_id()));
}

#[tokio::test]
async fn test_self_validation_passes() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _events) = recording_engine(store);

    let config = workspace.config(
        "download,basic_cleaning,data_check",
        &[("data_check.kl_threshold", "0.5")],
    );
    let report = engine.run(&config, &workspace.work_root()).await.unwrap();

    assert!(matches!(
        report.pipeline.stage(StageKind::DataCheck),
        Some(StageState::Completed { .. })
    ));
}

#[tokio::test]
async fn test_shifted_reference_fails_on_divergence() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, _events) = recording_engine(store.clone());

    let config = workspace.config("download,basic_cleaning", &[]);
    engine.run(&config, &workspace.work_root()).await.unwrap();

    // Same rows with every price tripled
    let clean = latest_dataset(store.as_ref(), "clean_sample.csv").await;
    let price = clean.column_index("price").unwrap();
    let rows = clean
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row[price] = row[price]
                .as_ref()
                .map(|p| (p.parse::<f64>().unwrap() * 3.0).to_string());
            row
        })
        .collect();
    let shifted = Dataset::new(clean.columns().to_vec(), rows).unwrap();
    store
        .publish(
            ArtifactDraft::from_dataset("shifted_reference.csv", "reference_data", "", &shifted)
                .unwrap(),
            None,
        )
        .await
        .unwrap();

    let config = workspace.config(
        "data_check",
        &[
            ("data_check.kl_threshold", "0.01"),
            ("data_check.reference_artifact", "shifted_reference.csv:latest"),
        ],
    );
    let err = engine.run(&config, &workspace.work_root()).await.unwrap_err();

    assert_eq!(err.stage(), Some("data_check"));
    let failure = err.validation_failure().expect("validation failure");
    assert!(failure.has_divergence());
    assert!(matches!(err, PipelineError::Validation { .. }));
}

#[tokio::test]
async fn test_full_run_then_promoted_model_is_scored() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store.clone());

    let config = workspace.config("all", &[]);
    let report = engine.run(&config, &workspace.work_root()).await.unwrap();

    assert_eq!(started_stages(&events).len(), 5);
    let names: Vec<&str> = report.published.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "raw_data.csv",
            "clean_sample.csv",
            "trainval_data.csv",
            "test_data.csv",
            "random_forest_export"
        ]
    );
    assert!(report
        .published
        .iter()
        .all(|v| v.run_id == Some(report.run_id())));
    assert!(report.context.work_dir().join(RF_CONFIG_FILE).exists());

    let trainval = latest_dataset(store.as_ref(), "trainval_data.csv").await;
    let test = latest_dataset(store.as_ref(), "test_data.csv").await;
    assert_eq!(trainval.len(), 13);
    assert_eq!(test.len(), 4);

    store
        .set_alias(&ArtifactRef::latest("random_forest_export"), "prod")
        .await
        .unwrap();

    let config = workspace.config("test_regression_model", &[]);
    let report = engine.run(&config, &workspace.work_root()).await.unwrap();
    assert!(matches!(
        report.pipeline.stage(StageKind::TestRegressionModel),
        Some(StageState::Completed { .. })
    ));
}

#[tokio::test]
async fn test_rerun_reuses_identical_versions() {
    let workspace = Workspace::new();
    let store = Arc::new(
        LocalArtifactStore::open(workspace.dir.path().join("store"))
            .await
            .unwrap(),
    );
    let engine = ExecutionEngine::new(store.clone());

    let config = workspace.config("download,basic_cleaning", &[]);
    let first = engine.run(&config, &workspace.work_root()).await.unwrap();
    let second = engine.run(&config, &workspace.work_root()).await.unwrap();
    assert_ne!(first.run_id(), second.run_id());

    let versions = store.list_versions(Some("clean_sample.csv")).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);
    assert_eq!(versions[0].run_id, Some(first.run_id()));
}
