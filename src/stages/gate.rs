//! Divergence gate: statistical acceptance checks on a candidate dataset
//! against a reference dataset

use crate::{
    artifacts::ArtifactRef,
    core::{
        config::RunConfig,
        context::RunContext,
        stage::{Stage, StageError, StageInputs, StageKind, StageOutput, StageParams},
    },
    data::{schema::SchemaDiff, Dataset, GeoBox},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Acceptance criteria applied by [`validate`]
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Largest accepted KL divergence, in nats
    pub kl_threshold: f64,
    pub min_price: f64,
    pub max_price: f64,
    /// Equal-width histogram bins over the union of both price ranges
    pub bins: usize,
    pub price_column: String,
    pub min_rows: usize,
    pub max_rows: Option<usize>,
    pub bounding_box: Option<GeoBox>,
    pub longitude_column: String,
    pub latitude_column: String,
    pub categorical_column: Option<String>,
    /// Threshold for the categorical divergence; `kl_threshold` when unset
    pub categorical_kl_threshold: Option<f64>,
    pub allowed_categories: Vec<String>,
}

impl GateConfig {
    /// Price checks only, with the default histogram
    pub fn new(kl_threshold: f64, min_price: f64, max_price: f64) -> Self {
        Self {
            kl_threshold,
            min_price,
            max_price,
            bins: 20,
            price_column: "price".to_string(),
            min_rows: 1,
            max_rows: None,
            bounding_box: None,
            longitude_column: "longitude".to_string(),
            latitude_column: "latitude".to_string(),
            categorical_column: None,
            categorical_kl_threshold: None,
            allowed_categories: Vec::new(),
        }
    }

    pub fn categorical_threshold(&self) -> f64 {
        self.categorical_kl_threshold.unwrap_or(self.kl_threshold)
    }

    pub fn from_config(config: &RunConfig) -> Self {
        let check = &config.data_check;
        Self {
            bins: check.bins,
            min_rows: check.min_rows,
            max_rows: check.max_rows,
            bounding_box: Some(config.etl.bounding_box),
            categorical_column: check.categorical_column.clone(),
            categorical_kl_threshold: check.categorical_kl_threshold,
            allowed_categories: check.allowed_categories.clone(),
            ..Self::new(check.kl_threshold, config.etl.min_price, config.etl.max_price)
        }
    }
}

/// One failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ValidationIssue {
    SchemaMismatch {
        diff: SchemaDiff,
    },
    MissingColumn {
        column: String,
        dataset: String,
    },
    PriceOutOfRange {
        count: usize,
        min: f64,
        max: f64,
    },
    NonNumeric {
        column: String,
        count: usize,
    },
    EmptyDistribution {
        column: String,
    },
    Divergence {
        column: String,
        divergence: f64,
        threshold: f64,
    },
    RowCount {
        rows: usize,
        min: usize,
        max: Option<usize>,
    },
    OutOfBounds {
        count: usize,
    },
    UnknownCategories {
        column: String,
        values: Vec<String>,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::SchemaMismatch { diff } => {
                write!(f, "schema mismatch")?;
                if !diff.missing.is_empty() {
                    write!(f, " (missing: {})", diff.missing.join(", "))?;
                }
                if !diff.unexpected.is_empty() {
                    write!(f, " (unexpected: {})", diff.unexpected.join(", "))?;
                }
                for (column, candidate, reference) in &diff.type_conflicts {
                    write!(f, " ({}: {:?} vs {:?})", column, candidate, reference)?;
                }
                Ok(())
            }
            ValidationIssue::MissingColumn { column, dataset } => {
                write!(f, "{} dataset has no '{}' column", dataset, column)
            }
            ValidationIssue::PriceOutOfRange { count, min, max } => {
                write!(f, "{} prices outside [{}, {}]", count, min, max)
            }
            ValidationIssue::NonNumeric { column, count } => {
                write!(f, "{} '{}' values are missing or not numbers", count, column)
            }
            ValidationIssue::EmptyDistribution { column } => {
                write!(f, "no observations of '{}' to compare", column)
            }
            ValidationIssue::Divergence {
                column,
                divergence,
                threshold,
            } => write!(
                f,
                "KL divergence of '{}' is {:.4}, above threshold {}",
                column, divergence, threshold
            ),
            ValidationIssue::RowCount { rows, min, max } => match max {
                Some(max) => write!(f, "{} rows, expected between {} and {}", rows, min, max),
                None => write!(f, "{} rows, expected at least {}", rows, min),
            },
            ValidationIssue::OutOfBounds { count } => {
                write!(f, "{} rows outside the bounding box", count)
            }
            ValidationIssue::UnknownCategories { column, values } => {
                write!(f, "unexpected '{}' values: {}", column, values.join(", "))
            }
        }
    }
}

/// Every check that failed in one gate evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn has_divergence(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::Divergence { .. }))
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{} check(s) failed: {}", self.issues.len(), rendered.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

/// Measurements of a passing candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub rows: usize,
    pub reference_rows: usize,
    pub divergence: f64,
    pub categorical_divergence: Option<f64>,
}

/// Run every check and collect all failures.
///
/// Divergence is `KL(candidate || reference)` over identical price bins.
pub fn validate(
    candidate: &Dataset,
    reference: &Dataset,
    config: &GateConfig,
) -> Result<GateReport, ValidationFailure> {
    let mut issues = Vec::new();

    let diff = candidate.schema().diff(&reference.schema());
    if !diff.is_empty() {
        issues.push(ValidationIssue::SchemaMismatch { diff });
    }

    let rows = candidate.len();
    let too_many = config.max_rows.map_or(false, |max| rows > max);
    if rows < config.min_rows || too_many {
        issues.push(ValidationIssue::RowCount {
            rows,
            min: config.min_rows,
            max: config.max_rows,
        });
    }

    let divergence = check_price(candidate, reference, config, &mut issues);

    if let Some(bbox) = &config.bounding_box {
        check_bounds(candidate, bbox, config, &mut issues);
    }

    let categorical_divergence = config
        .categorical_column
        .as_deref()
        .and_then(|column| check_categories(candidate, reference, column, config, &mut issues));

    if issues.is_empty() {
        Ok(GateReport {
            rows,
            reference_rows: reference.len(),
            divergence: divergence.unwrap_or(0.0),
            categorical_divergence,
        })
    } else {
        Err(ValidationFailure::new(issues))
    }
}

fn observed(dataset: &Dataset, column: &str) -> Option<Vec<f64>> {
    dataset
        .numeric_column(column)
        .ok()
        .map(|values| values.into_iter().flatten().collect())
}

fn check_price(
    candidate: &Dataset,
    reference: &Dataset,
    config: &GateConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Option<f64> {
    let column = &config.price_column;
    let missing = |dataset: &str| ValidationIssue::MissingColumn {
        column: column.clone(),
        dataset: dataset.to_string(),
    };

    let Ok(candidate_cells) = candidate.numeric_column(column) else {
        issues.push(missing("candidate"));
        return None;
    };

    // Unparseable and empty cells cannot be inside the range
    let non_numeric = candidate_cells.iter().filter(|p| p.is_none()).count();
    if non_numeric > 0 {
        issues.push(ValidationIssue::NonNumeric {
            column: column.clone(),
            count: non_numeric,
        });
    }
    let candidate_prices: Vec<f64> = candidate_cells.into_iter().flatten().collect();

    let out_of_range = candidate_prices
        .iter()
        .filter(|p| **p < config.min_price || **p > config.max_price)
        .count();
    if out_of_range > 0 {
        issues.push(ValidationIssue::PriceOutOfRange {
            count: out_of_range,
            min: config.min_price,
            max: config.max_price,
        });
    }

    let Some(reference_prices) = observed(reference, column) else {
        issues.push(missing("reference"));
        return None;
    };
    if candidate_prices.is_empty() || reference_prices.is_empty() {
        issues.push(ValidationIssue::EmptyDistribution {
            column: column.clone(),
        });
        return None;
    }

    let (p, q) = shared_histograms(&candidate_prices, &reference_prices, config.bins);
    let divergence = kl_divergence(&p, &q);
    tracing::debug!("Price KL divergence {:.6} over {} bins", divergence, config.bins);

    if divergence > config.kl_threshold {
        issues.push(ValidationIssue::Divergence {
            column: column.clone(),
            divergence,
            threshold: config.kl_threshold,
        });
    }
    Some(divergence)
}

fn check_bounds(
    candidate: &Dataset,
    bbox: &GeoBox,
    config: &GateConfig,
    issues: &mut Vec<ValidationIssue>,
) {
    let longitudes = candidate.numeric_column(&config.longitude_column);
    let latitudes = candidate.numeric_column(&config.latitude_column);
    match (longitudes, latitudes) {
        (Ok(longitudes), Ok(latitudes)) => {
            let count = longitudes
                .iter()
                .zip(&latitudes)
                .filter(|(lon, lat)| match (lon, lat) {
                    (Some(lon), Some(lat)) => !bbox.contains(*lon, *lat),
                    _ => true,
                })
                .count();
            if count > 0 {
                issues.push(ValidationIssue::OutOfBounds { count });
            }
        }
        (lon, lat) => {
            for (result, column) in [
                (lon.is_err(), &config.longitude_column),
                (lat.is_err(), &config.latitude_column),
            ] {
                if result {
                    issues.push(ValidationIssue::MissingColumn {
                        column: column.clone(),
                        dataset: "candidate".to_string(),
                    });
                }
            }
        }
    }
}

fn check_categories(
    candidate: &Dataset,
    reference: &Dataset,
    column: &str,
    config: &GateConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Option<f64> {
    let (candidate_values, reference_values) =
        match (candidate.text_column(column), reference.text_column(column)) {
            (Ok(c), Ok(r)) => (c, r),
            (c, _) => {
                let dataset = if c.is_err() { "candidate" } else { "reference" };
                issues.push(ValidationIssue::MissingColumn {
                    column: column.to_string(),
                    dataset: dataset.to_string(),
                });
                return None;
            }
        };

    if !config.allowed_categories.is_empty() {
        let unknown: BTreeSet<String> = candidate_values
            .iter()
            .flatten()
            .filter(|v| !config.allowed_categories.iter().any(|a| a == *v))
            .map(|v| v.to_string())
            .collect();
        if !unknown.is_empty() {
            issues.push(ValidationIssue::UnknownCategories {
                column: column.to_string(),
                values: unknown.into_iter().collect(),
            });
        }
    }

    let p = frequencies(candidate_values.iter().flatten().copied());
    let q = frequencies(reference_values.iter().flatten().copied());
    if p.is_empty() || q.is_empty() {
        issues.push(ValidationIssue::EmptyDistribution {
            column: column.to_string(),
        });
        return None;
    }

    let categories: BTreeSet<&str> = p.keys().chain(q.keys()).copied().collect();
    let p_dist: Vec<f64> = categories.iter().map(|c| p.get(c).copied().unwrap_or(0.0)).collect();
    let q_dist: Vec<f64> = categories.iter().map(|c| q.get(c).copied().unwrap_or(0.0)).collect();
    let divergence = kl_divergence(&p_dist, &q_dist);

    let threshold = config.categorical_threshold();
    if divergence > threshold {
        issues.push(ValidationIssue::Divergence {
            column: column.to_string(),
            divergence,
            threshold,
        });
    }
    Some(divergence)
}

fn frequencies<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<&'a str, f64> {
    let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
    let mut total = 0.0;
    for value in values {
        *counts.entry(value).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    for count in counts.values_mut() {
        *count /= total;
    }
    counts
}

/// Normalized histograms of two samples over the same equal-width bins,
/// spanning the union of both ranges
pub fn shared_histograms(a: &[f64], b: &[f64], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let bins = bins.max(1);
    let (lo, hi) = a
        .iter()
        .chain(b)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    (histogram(a, lo, hi, bins), histogram(b, lo, hi, bins))
}

fn histogram(values: &[f64], lo: f64, hi: f64, bins: usize) -> Vec<f64> {
    let mut counts = vec![0.0; bins];
    if values.is_empty() {
        return counts;
    }
    let width = (hi - lo) / bins as f64;
    for value in values {
        let index = if width > 0.0 {
            (((value - lo) / width).floor() as usize).min(bins - 1)
        } else {
            0
        };
        counts[index] += 1.0;
    }
    let total = values.len() as f64;
    counts.iter_mut().for_each(|c| *c /= total);
    counts
}

/// `Σ p_i ln(p_i / q_i)`; a bin with mass in `p` but none in `q` makes the
/// divergence infinite
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    let mut total = 0.0;
    for (pi, qi) in p.iter().zip(q) {
        if *pi <= 0.0 {
            continue;
        }
        if *qi <= 0.0 {
            return f64::INFINITY;
        }
        total += pi * (pi / qi).ln();
    }
    total.max(0.0)
}

/// The `data_check` stage: gate the cleaned data before it is split
pub struct DataCheckStage {
    candidate: ArtifactRef,
    reference: Option<ArtifactRef>,
    gate: GateConfig,
}

impl DataCheckStage {
    /// `reference: None` compares the candidate against itself
    pub fn new(candidate: ArtifactRef, reference: Option<ArtifactRef>, gate: GateConfig) -> Self {
        Self {
            candidate,
            reference,
            gate,
        }
    }
}

#[async_trait]
impl Stage for DataCheckStage {
    fn kind(&self) -> StageKind {
        StageKind::DataCheck
    }

    fn inputs(&self) -> Vec<ArtifactRef> {
        let mut inputs = vec![self.candidate.clone()];
        inputs.extend(self.reference.clone());
        inputs
    }

    fn params(&self) -> StageParams {
        let params = StageParams::new()
            .with("csv", &self.candidate)
            .with("kl_threshold", self.gate.kl_threshold)
            .with("min_price", self.gate.min_price)
            .with("max_price", self.gate.max_price);
        match &self.reference {
            Some(reference) => params.with("ref", reference),
            None => params.with("ref", &self.candidate),
        }
    }

    async fn run(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let candidate = inputs.dataset(&self.candidate)?;
        let reference = match &self.reference {
            Some(reference) => inputs.dataset(reference)?,
            None => {
                tracing::warn!(
                    "[{}] No reference artifact configured; comparing {} against itself",
                    ctx.job_label(self.kind()),
                    self.candidate
                );
                candidate.clone()
            }
        };

        let report = validate(&candidate, &reference, &self.gate)?;
        tracing::info!(
            "[{}] {} rows passed; price KL divergence {:.4} (threshold {})",
            ctx.job_label(self.kind()),
            report.rows,
            report.divergence,
            self.gate.kl_threshold
        );

        Ok(StageOutput::new(format!(
            "{} rows, KL {:.4} <= {}",
            report.rows, report.divergence, self.gate.kl_threshold
        )))
    }
}
