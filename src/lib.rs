//! rental-pipeline - trains a short-term-rental price model behind a
//! statistical data-quality gate

pub mod artifacts;
pub mod cli;
pub mod core;
pub mod data;
pub mod execution;
pub mod model;
pub mod persistence;
pub mod stages;

// Re-export commonly used types
pub use artifacts::{ArtifactRef, ArtifactStore, ArtifactVersion, InMemoryArtifactStore};
pub use crate::core::{ExecutionStatus, Pipeline, PipelineError, RunConfig, RunContext, Stage, StageKind};
pub use data::Dataset;
pub use execution::{ExecutionEngine, ExecutionEvent, RunReport};
