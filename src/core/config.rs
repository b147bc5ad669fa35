//! Run configuration from YAML

use crate::{
    artifacts::ArtifactRef,
    core::stage::StageKind,
    data::GeoBox,
    execution::scheduler::ExecutionScheduler,
    model::{FeatureColumns, ForestParams},
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a run configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown stage '{name}' (known stages: {known})")]
    UnknownStage { name: String, known: String },

    #[error("stage selector is empty")]
    EmptySelector,

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid override '{0}': expected KEY.PATH=VALUE")]
    Override(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level run configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Project attribution and stage selection
    pub main: MainConfig,

    /// Ingestion and cleaning thresholds
    pub etl: EtlConfig,

    #[serde(default)]
    pub basic_cleaning: CleaningConfig,

    #[serde(default)]
    pub data_check: DataCheckConfig,

    #[serde(default)]
    pub modeling: ModelingConfig,

    #[serde(default)]
    pub test_regression_model: RegressionTestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainConfig {
    /// Project identifier used for attribution
    pub project_name: String,

    /// Run group identifier used for attribution
    pub experiment_name: String,

    /// `all` or a comma-separated subset of the master list
    #[serde(default = "default_steps")]
    pub steps: String,

    /// Per-stage timeout (seconds)
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtlConfig {
    /// Local CSV imported by the download stage
    pub sample: PathBuf,

    pub min_price: f64,

    pub max_price: f64,

    #[serde(default)]
    pub bounding_box: GeoBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleaningConfig {
    #[serde(default = "default_raw_reference")]
    pub input_artifact: String,

    #[serde(default = "default_clean_artifact")]
    pub output_artifact: String,

    #[serde(default = "default_clean_type")]
    pub output_type: String,

    #[serde(default = "default_clean_description")]
    pub output_description: String,

    /// Columns that must be present; empty means every column
    #[serde(default)]
    pub required_columns: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            input_artifact: default_raw_reference(),
            output_artifact: default_clean_artifact(),
            output_type: default_clean_type(),
            output_description: default_clean_description(),
            required_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataCheckConfig {
    #[serde(default = "default_kl_threshold")]
    pub kl_threshold: f64,

    /// Reference dataset; unset compares the cleaned data against itself
    #[serde(default)]
    pub reference_artifact: Option<String>,

    /// Number of equal-width price bins
    #[serde(default = "default_bins")]
    pub bins: usize,

    #[serde(default = "default_min_rows")]
    pub min_rows: usize,

    #[serde(default)]
    pub max_rows: Option<usize>,

    /// Categorical column compared by category frequencies
    #[serde(default)]
    pub categorical_column: Option<String>,

    /// Threshold for the categorical divergence; falls back to `kl_threshold`
    #[serde(default)]
    pub categorical_kl_threshold: Option<f64>,

    /// Accepted values of `categorical_column`; empty accepts anything
    #[serde(default)]
    pub allowed_categories: Vec<String>,
}

impl Default for DataCheckConfig {
    fn default() -> Self {
        Self {
            kl_threshold: default_kl_threshold(),
            reference_artifact: None,
            bins: default_bins(),
            min_rows: default_min_rows(),
            max_rows: None,
            categorical_column: None,
            categorical_kl_threshold: None,
            allowed_categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelingConfig {
    /// Fraction of rows held out as the test split
    #[serde(default = "default_fraction")]
    pub test_size: f64,

    /// Fraction of trainval rows held out for validation
    #[serde(default = "default_fraction")]
    pub val_size: f64,

    #[serde(default = "default_seed")]
    pub random_seed: u64,

    /// Stratification column, or `none`
    #[serde(default = "default_stratify_by")]
    pub stratify_by: String,

    #[serde(default = "default_max_tfidf_features")]
    pub max_tfidf_features: usize,

    #[serde(default = "default_model_artifact")]
    pub output_artifact: String,

    #[serde(default)]
    pub features: FeatureColumns,

    /// Flat hyperparameter set, written to `rf_config.json` for training
    #[serde(default)]
    pub random_forest: ForestParams,
}

impl Default for ModelingConfig {
    fn default() -> Self {
        Self {
            test_size: default_fraction(),
            val_size: default_fraction(),
            random_seed: default_seed(),
            stratify_by: default_stratify_by(),
            max_tfidf_features: default_max_tfidf_features(),
            output_artifact: default_model_artifact(),
            features: FeatureColumns::default(),
            random_forest: ForestParams::default(),
        }
    }
}

impl ModelingConfig {
    /// `None` when stratification is disabled
    pub fn stratify_column(&self) -> Option<&str> {
        stratify_column(&self.stratify_by)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionTestConfig {
    #[serde(default = "default_prod_model")]
    pub model_artifact: String,

    #[serde(default = "default_test_reference")]
    pub test_artifact: String,

    /// Fail the stage when test R² drops below this
    #[serde(default)]
    pub min_r2: Option<f64>,
}

impl Default for RegressionTestConfig {
    fn default() -> Self {
        Self {
            model_artifact: default_prod_model(),
            test_artifact: default_test_reference(),
            min_r2: None,
        }
    }
}

fn default_steps() -> String {
    "all".to_string()
}
fn default_stage_timeout_secs() -> u64 {
    3600
}
fn default_raw_reference() -> String {
    "raw_data.csv:latest".to_string()
}
fn default_clean_artifact() -> String {
    "clean_sample.csv".to_string()
}
fn default_clean_type() -> String {
    "clean_data".to_string()
}
fn default_clean_description() -> String {
    "Data with outliers and null values removed".to_string()
}
fn default_kl_threshold() -> f64 {
    0.2
}
fn default_bins() -> usize {
    20
}
fn default_min_rows() -> usize {
    1
}
fn default_fraction() -> f64 {
    0.2
}
fn default_seed() -> u64 {
    42
}
fn default_stratify_by() -> String {
    "neighbourhood_group".to_string()
}
fn default_max_tfidf_features() -> usize {
    5
}
fn default_model_artifact() -> String {
    "random_forest_export".to_string()
}
fn default_prod_model() -> String {
    "random_forest_export:prod".to_string()
}
fn default_test_reference() -> String {
    "test_data.csv:latest".to_string()
}

/// Map the `none` sentinel to no stratification
pub fn stratify_column(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed)
    }
}

impl RunConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_file_with_overrides(path, &[])
    }

    /// Load configuration from a YAML file, applying `key.path=value` overrides first
    pub fn from_file_with_overrides<P: AsRef<Path>>(
        path: P,
        overrides: &[(String, String)],
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_with_overrides(&content, overrides)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_overrides(yaml, &[])
    }

    pub fn from_yaml_with_overrides(
        yaml: &str,
        overrides: &[(String, String)],
    ) -> Result<Self, ConfigError> {
        let mut tree: Value = serde_yaml::from_str(yaml)?;
        for (key, raw) in overrides {
            apply_override(&mut tree, key, raw)?;
        }
        let config: RunConfig = serde_yaml::from_value(tree)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.active_stages()?;

        if self.main.project_name.trim().is_empty() {
            return Err(ConfigError::invalid("main.project_name", "must not be empty"));
        }
        if self.main.experiment_name.trim().is_empty() {
            return Err(ConfigError::invalid("main.experiment_name", "must not be empty"));
        }
        if self.main.stage_timeout_secs == 0 {
            return Err(ConfigError::invalid("main.stage_timeout_secs", "must be positive"));
        }

        if !self.etl.min_price.is_finite() || !self.etl.max_price.is_finite() {
            return Err(ConfigError::invalid("etl.min_price", "price bounds must be finite"));
        }
        if self.etl.min_price > self.etl.max_price {
            return Err(ConfigError::invalid(
                "etl.min_price",
                format!(
                    "min_price {} exceeds max_price {}",
                    self.etl.min_price, self.etl.max_price
                ),
            ));
        }
        self.etl
            .bounding_box
            .validate()
            .map_err(|reason| ConfigError::invalid("etl.bounding_box", reason))?;

        check_reference("basic_cleaning.input_artifact", &self.basic_cleaning.input_artifact)?;
        check_name("basic_cleaning.output_artifact", &self.basic_cleaning.output_artifact)?;

        let check = &self.data_check;
        if check.kl_threshold.is_nan() || check.kl_threshold < 0.0 {
            return Err(ConfigError::invalid("data_check.kl_threshold", "must be >= 0"));
        }
        if let Some(threshold) = check.categorical_kl_threshold {
            if threshold.is_nan() || threshold < 0.0 {
                return Err(ConfigError::invalid(
                    "data_check.categorical_kl_threshold",
                    "must be >= 0",
                ));
            }
        }
        if check.bins == 0 {
            return Err(ConfigError::invalid("data_check.bins", "must be at least 1"));
        }
        if let Some(max_rows) = check.max_rows {
            if max_rows < check.min_rows {
                return Err(ConfigError::invalid(
                    "data_check.max_rows",
                    format!("{} is below min_rows {}", max_rows, check.min_rows),
                ));
            }
        }
        if let Some(reference) = &check.reference_artifact {
            check_reference("data_check.reference_artifact", reference)?;
        }

        let modeling = &self.modeling;
        check_fraction("modeling.test_size", modeling.test_size)?;
        check_fraction("modeling.val_size", modeling.val_size)?;
        check_name("modeling.output_artifact", &modeling.output_artifact)?;
        modeling
            .random_forest
            .validate()
            .map_err(|reason| ConfigError::invalid("modeling.random_forest", reason))?;

        check_reference(
            "test_regression_model.model_artifact",
            &self.test_regression_model.model_artifact,
        )?;
        check_reference(
            "test_regression_model.test_artifact",
            &self.test_regression_model.test_artifact,
        )?;

        Ok(())
    }

    /// Stages selected by `main.steps`, in master-list order
    pub fn active_stages(&self) -> Result<Vec<StageKind>, ConfigError> {
        ExecutionScheduler::resolve(&self.main.steps)
    }
}

fn check_fraction(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{} is not in (0, 1)", value)))
    }
}

fn check_reference(field: &str, value: &str) -> Result<(), ConfigError> {
    ArtifactRef::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::invalid(field, e.to_string()))
}

fn check_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() || value.contains(':') {
        Err(ConfigError::invalid(field, "artifact names must be non-empty and contain no ':'"))
    } else {
        Ok(())
    }
}

/// Apply a dotted-path override (`etl.min_price=20`) to a YAML tree.
///
/// The value is parsed as a YAML scalar so numbers and booleans keep their
/// type. Missing intermediate mappings are created.
pub fn apply_override(tree: &mut Value, key: &str, raw: &str) -> Result<(), ConfigError> {
    let segments: Vec<&str> = key.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::Override(format!("{}={}", key, raw)));
    }

    let parsed: Value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| ConfigError::Override(format!("{}={}", key, raw)))?;
        node = map
            .entry(Value::String(segment.to_string()))
            .or_insert(Value::Null);
    }

    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    let map = node
        .as_mapping_mut()
        .ok_or_else(|| ConfigError::Override(format!("{}={}", key, raw)))?;
    let last = segments[segments.len() - 1];
    map.insert(Value::String(last.to_string()), parsed);
    Ok(())
}
