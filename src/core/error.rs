//! Pipeline error taxonomy

use crate::{
    artifacts::ArtifactError,
    core::{
        config::ConfigError,
        stage::{StageError, StageParams},
    },
    stages::gate::ValidationFailure,
};
use thiserror::Error;

/// Any error that aborts a run.
///
/// Stage-level variants carry the stage name and its parameters so the
/// failing step can be reproduced by hand.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("stage '{stage}': {source}")]
    Artifact {
        stage: String,
        #[source]
        source: ArtifactError,
    },

    #[error("stage '{stage}' rejected the data [{params}]: {failure}")]
    Validation {
        stage: String,
        params: StageParams,
        failure: ValidationFailure,
    },

    #[error("stage '{stage}' failed [{params}]: {source}")]
    StageExecution {
        stage: String,
        params: StageParams,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// Attach stage context to a stage error, lifting validation failures
    /// into their own variant
    pub fn from_stage(stage: &str, params: StageParams, error: StageError) -> Self {
        match error {
            StageError::Validation(failure) => PipelineError::Validation {
                stage: stage.to_string(),
                params,
                failure,
            },
            source => PipelineError::StageExecution {
                stage: stage.to_string(),
                params,
                source,
            },
        }
    }

    pub fn artifact(stage: &str, source: ArtifactError) -> Self {
        PipelineError::Artifact {
            stage: stage.to_string(),
            source,
        }
    }

    /// Name of the stage that failed, if the error came from one
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Configuration(_) => None,
            PipelineError::Artifact { stage, .. }
            | PipelineError::Validation { stage, .. }
            | PipelineError::StageExecution { stage, .. } => Some(stage),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            PipelineError::Validation { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::gate::ValidationIssue;

    #[test]
    fn test_validation_errors_get_their_own_variant() {
        let failure = ValidationFailure::new(vec![ValidationIssue::RowCount {
            rows: 0,
            min: 1,
            max: None,
        }]);
        let params = StageParams::new().with("kl_threshold", 0.2);
        let error = PipelineError::from_stage("data_check", params, StageError::Validation(failure));

        assert_eq!(error.stage(), Some("data_check"));
        assert!(error.validation_failure().is_some());
        assert!(error.to_string().contains("kl_threshold=0.2"));
    }

    #[test]
    fn test_stage_errors_keep_params() {
        let params = StageParams::new().with("test_size", 0.2);
        let error = PipelineError::from_stage(
            "data_split",
            params,
            StageError::Failed("boom".to_string()),
        );
        let message = error.to_string();
        assert!(message.contains("data_split"));
        assert!(message.contains("test_size=0.2"));
        assert!(message.contains("boom"));
    }
}
