//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run the pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the run configuration YAML file
    #[arg(short, long, default_value = "config.yaml")]
    pub file: PathBuf,

    /// Stage selector, replacing `main.steps` (`all` or a comma-separated list)
    #[arg(long)]
    pub steps: Option<String>,

    /// Configuration overrides (KEY.PATH=VALUE)
    #[arg(value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Directory for per-run scratch space
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Keep the run's scratch directory after a successful run
    #[arg(long)]
    pub keep_work_dir: bool,
}

/// Validate a run configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the run configuration YAML file
    #[arg(short, long, default_value = "config.yaml")]
    pub file: PathBuf,

    /// Configuration overrides (KEY.PATH=VALUE)
    #[arg(value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Project and run group a standalone stage run is attributed to
#[derive(Debug, Args, Clone)]
pub struct Attribution {
    /// Project name
    #[arg(long, default_value = "nyc_airbnb")]
    pub project: String,

    /// Run group
    #[arg(long, default_value = "development")]
    pub group: String,
}

/// Run the cleaning stage
#[derive(Debug, Args, Clone)]
pub struct CleanCommand {
    /// Reference of the raw artifact
    #[arg(long = "input_artifact")]
    pub input_artifact: String,

    /// Name for the cleaned artifact
    #[arg(long = "output_artifact")]
    pub output_artifact: String,

    /// Type of the cleaned artifact
    #[arg(long = "output_type")]
    pub output_type: String,

    /// Description of the cleaned artifact
    #[arg(long = "output_description")]
    pub output_description: String,

    /// Also write the cleaned CSV to this path
    #[arg(long = "output_file")]
    pub output_file: Option<PathBuf>,

    /// Minimum price to keep
    #[arg(long = "min_price")]
    pub min_price: f64,

    /// Maximum price to keep
    #[arg(long = "max_price")]
    pub max_price: f64,

    #[command(flatten)]
    pub attribution: Attribution,
}

/// Run the data-quality gate
#[derive(Debug, Args, Clone)]
pub struct CheckCommand {
    /// Reference of the candidate artifact
    #[arg(long)]
    pub csv: String,

    /// Reference artifact to compare against (the candidate itself when omitted)
    #[arg(long = "ref")]
    pub reference: Option<String>,

    /// Maximum KL divergence of the price distribution
    #[arg(long = "kl_threshold")]
    pub kl_threshold: f64,

    /// Minimum allowed price
    #[arg(long = "min_price")]
    pub min_price: f64,

    /// Maximum allowed price
    #[arg(long = "max_price")]
    pub max_price: f64,

    #[command(flatten)]
    pub attribution: Attribution,
}

/// Train the random forest
#[derive(Debug, Args, Clone)]
pub struct TrainCommand {
    /// Reference of the trainval artifact
    #[arg(long = "trainval_file")]
    pub trainval_file: String,

    /// Fraction of trainval held out for validation
    #[arg(long = "val_size", default_value_t = 0.2)]
    pub val_size: f64,

    /// Seed for the validation split
    #[arg(long = "random_seed", default_value_t = 42)]
    pub random_seed: u64,

    /// Column to stratify on, or `none`
    #[arg(long = "stratify_by", default_value = "none")]
    pub stratify_by: String,

    /// Random forest hyperparameters as JSON
    #[arg(long = "rf_config")]
    pub rf_config: PathBuf,

    /// Vocabulary size for the listing-name TF-IDF features
    #[arg(long = "max_tfidf_features", default_value_t = 5)]
    pub max_tfidf_features: usize,

    /// Name for the exported model artifact
    #[arg(long = "output_artifact")]
    pub output_artifact: String,

    #[command(flatten)]
    pub attribution: Attribution,
}

/// List artifact versions
#[derive(Debug, Args, Clone)]
pub struct ArtifactsCommand {
    /// Only show versions of this artifact
    pub name: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Attach an alias to an artifact version
#[derive(Debug, Args, Clone)]
pub struct PromoteCommand {
    /// Artifact reference (NAME:latest, NAME:vN, or NAME:ALIAS)
    pub reference: String,

    /// Alias to attach, such as `prod`
    pub alias: String,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Project name to filter by
    #[arg(short, long)]
    pub project: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run by id
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("modeling.random_forest.max_depth=10").unwrap(),
            ("modeling.random_forest.max_depth".to_string(), "10".to_string())
        );
        assert_eq!(
            parse_key_value("main.steps=a=b").unwrap(),
            ("main.steps".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("no_equals").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
