//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    ArtifactsCommand, CheckCommand, CleanCommand, HistoryCommand, PromoteCommand, RunCommand,
    TrainCommand, ValidateCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Rental price model pipeline
#[derive(Debug, Parser, Clone)]
#[command(name = "rental-pipeline")]
#[command(version = "0.1.0")]
#[command(
    about = "Runs the short-term-rental price model pipeline with a data-quality gate",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Artifact store directory (defaults to the user data directory)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the pipeline from a configuration file
    Run(RunCommand),

    /// Validate a run configuration
    Validate(ValidateCommand),

    /// Run the cleaning stage on one artifact
    Clean(CleanCommand),

    /// Run the data-quality gate on one artifact
    Check(CheckCommand),

    /// Train the random forest from a trainval artifact
    Train(TrainCommand),

    /// List stored artifact versions
    Artifacts(ArtifactsCommand),

    /// Attach an alias such as `prod` to an artifact version
    Promote(PromoteCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
