//! Stage domain model

use crate::{
    artifacts::{Artifact, ArtifactDraft, ArtifactRef},
    core::context::RunContext,
    data::{DataError, Dataset},
    model::ModelError,
    stages::{gate::ValidationFailure, split::SplitError},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Every stage the pipeline knows about, in master-list order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Import the raw sample into the artifact store
    Download,
    /// Drop outliers and incomplete rows
    BasicCleaning,
    /// Divergence gate on the cleaned data
    DataCheck,
    /// Stratified trainval/test partition
    DataSplit,
    /// Fit and export the random forest
    TrainRandomForest,
    /// Score a promoted model against the test split
    TestRegressionModel,
}

impl StageKind {
    /// The ordered master list. Execution always follows this order.
    pub const MASTER_LIST: [StageKind; 6] = [
        StageKind::Download,
        StageKind::BasicCleaning,
        StageKind::DataCheck,
        StageKind::DataSplit,
        StageKind::TrainRandomForest,
        StageKind::TestRegressionModel,
    ];

    /// Stable name used in selectors, logs and history
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Download => "download",
            StageKind::BasicCleaning => "basic_cleaning",
            StageKind::DataCheck => "data_check",
            StageKind::DataSplit => "data_split",
            StageKind::TrainRandomForest => "train_random_forest",
            StageKind::TestRegressionModel => "test_regression_model",
        }
    }

    /// Position in the master list
    pub fn ordinal(self) -> usize {
        Self::MASTER_LIST
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(Self::MASTER_LIST.len())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::MASTER_LIST.iter().copied().find(|kind| kind.name() == name)
    }

    /// Whether the `all` selector includes this stage.
    ///
    /// The regression test scores a model promoted to `prod` and is only
    /// run when named explicitly.
    pub fn runs_on_all(self) -> bool {
        !matches!(self, StageKind::TestRegressionModel)
    }

    /// Comma-separated master list, for error messages
    pub fn known_names() -> String {
        Self::MASTER_LIST
            .iter()
            .map(|kind| kind.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters a stage was invoked with, kept for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParams(BTreeMap<String, String>);

impl StageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StageParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&rendered.join(", "))
    }
}

/// Errors raised by a stage body
#[derive(Debug, Error)]
pub enum StageError {
    #[error("input artifact '{0}' was not materialized")]
    MissingInput(String),

    #[error("declared output '{0}' was not produced")]
    MissingOutput(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Artifacts materialized by the orchestrator for one stage invocation
#[derive(Debug, Default)]
pub struct StageInputs {
    artifacts: HashMap<ArtifactRef, Artifact>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: ArtifactRef, artifact: Artifact) {
        self.artifacts.insert(reference, artifact);
    }

    pub fn contains(&self, reference: &ArtifactRef) -> bool {
        self.artifacts.contains_key(reference)
    }

    pub fn get(&self, reference: &ArtifactRef) -> Result<&Artifact, StageError> {
        self.artifacts
            .get(reference)
            .ok_or_else(|| StageError::MissingInput(reference.to_string()))
    }

    /// Decode a materialized input as a CSV dataset
    pub fn dataset(&self, reference: &ArtifactRef) -> Result<Dataset, StageError> {
        Ok(self.get(reference)?.dataset()?)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// What a stage hands back to the orchestrator
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Artifacts to publish, in order
    pub artifacts: Vec<ArtifactDraft>,

    /// One-line human summary (row counts, metrics)
    pub summary: String,
}

impl StageOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            artifacts: Vec::new(),
            summary: summary.into(),
        }
    }

    pub fn with_artifact(mut self, draft: ArtifactDraft) -> Self {
        self.artifacts.push(draft);
        self
    }
}

/// A unit of pipeline work.
///
/// Stages never touch the artifact store: the orchestrator materializes the
/// declared inputs before `run` and publishes the returned drafts after it.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Artifact references that must be materialized before `run`
    fn inputs(&self) -> Vec<ArtifactRef> {
        Vec::new()
    }

    /// Artifact names `run` must produce
    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn params(&self) -> StageParams;

    async fn run(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_list_order() {
        let names: Vec<_> = StageKind::MASTER_LIST.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "download",
                "basic_cleaning",
                "data_check",
                "data_split",
                "train_random_forest",
                "test_regression_model"
            ]
        );
        assert_eq!(StageKind::Download.ordinal(), 0);
        assert_eq!(StageKind::TestRegressionModel.ordinal(), 5);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(StageKind::from_name("data_check"), Some(StageKind::DataCheck));
        assert_eq!(StageKind::from_name("downlod"), None);
    }

    #[test]
    fn test_params_display_is_sorted() {
        let params = StageParams::new().with("min_price", 10).with("max_price", 350);
        assert_eq!(params.to_string(), "max_price=350, min_price=10");
        assert_eq!(params.get("min_price"), Some("10"));
    }
}
