//! Test: Stage selection - membership, ordering and unknown names

use crate::helpers::*;
use rental_pipeline::{
    artifacts::{ArtifactStore, InMemoryArtifactStore},
    core::{ConfigError, RunConfig, StageKind, StageState},
};
use std::sync::Arc;

#[tokio::test]
async fn test_misspelled_stage_fails_before_any_stage_runs() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store.clone());

    let mut config = workspace.config("all", &[]);
    config.main.steps = "download,downlod".to_string();

    let err = engine.run(&config, &workspace.work_root()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("downlod"));
    assert!(events.lock().unwrap().is_empty());
    assert!(store.list_versions(None).await.unwrap().is_empty());
}

#[test]
fn test_misspelled_stage_is_rejected_at_load() {
    let yaml = format!(
        "main:\n  project_name: p\n  experiment_name: g\n  steps: downlod\netl:\n  sample: {}\n  min_price: 10\n  max_price: 350\n",
        "sample1.csv"
    );
    match RunConfig::from_yaml(&yaml) {
        Err(ConfigError::UnknownStage { name, .. }) => assert_eq!(name, "downlod"),
        other => panic!("expected unknown stage, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_selector_order_is_ignored() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store);

    let config = workspace.config("basic_cleaning,download", &[]);
    let report = engine.run(&config, &workspace.work_root()).await.unwrap();

    assert_eq!(
        started_stages(&events),
        vec![StageKind::Download, StageKind::BasicCleaning]
    );
    assert!(matches!(
        report.pipeline.stage(StageKind::DataCheck),
        Some(StageState::Skipped { .. })
    ));
}

#[tokio::test]
async fn test_all_does_not_run_the_regression_test() {
    let workspace = Workspace::new();
    let store = Arc::new(InMemoryArtifactStore::new());
    let (engine, events) = recording_engine(store);

    let config = workspace.config("all", &[]);
    engine.run(&config, &workspace.work_root()).await.unwrap();

    assert!(!started_stages(&events).contains(&StageKind::TestRegressionModel));
}
