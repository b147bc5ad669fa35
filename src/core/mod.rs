//! Core domain models for the pipeline
//!
//! This module defines the run configuration, the stage contract, the
//! run context, and the execution state of a pipeline run.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use config::{ConfigError, RunConfig};
pub use context::RunContext;
pub use error::PipelineError;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
