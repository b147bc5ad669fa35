//! Price regression model: feature preprocessing, random forest and the
//! exported JSON model

pub mod features;
pub mod forest;
pub mod tfidf;

pub use features::{FeatureColumns, FeaturePipeline};
pub use forest::{ForestParams, MaxFeatures, MaxFeaturesRule, RandomForest};

use crate::data::{DataError, Dataset};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// Export format version written into every model artifact
pub const EXPORT_FORMAT: u32 = 1;

/// Errors raised while fitting or applying a model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no rows to fit on")]
    NoRows,

    #[error("invalid model parameters: {0}")]
    InvalidParams(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("training cancelled")]
    Cancelled,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("model serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported model export format {0}")]
    Format(u32),
}

/// Regression quality on a labelled dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Coefficient of determination
    pub r2: f64,
    /// Mean absolute error
    pub mae: f64,
    pub rows: usize,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Result<Self, ModelError> {
        if actual.len() != predicted.len() {
            return Err(ModelError::Shape(format!(
                "{} targets for {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        if actual.is_empty() {
            return Err(ModelError::NoRows);
        }

        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;
        let ss_res: f64 = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p) * (a - p))
            .sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean) * (a - mean)).sum();
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / n;

        // constant targets: perfect predictions score 1, anything else 0
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        Ok(Self {
            r2,
            mae,
            rows: actual.len(),
        })
    }
}

/// Inputs of one training run
#[derive(Debug, Clone)]
pub struct TrainParams {
    pub columns: FeatureColumns,
    pub forest: ForestParams,
    pub max_tfidf_features: usize,
}

/// Serializable trained model: preprocessing plus forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExport {
    pub format: u32,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub features: FeaturePipeline,
    pub forest: RandomForest,
    pub params: ForestParams,
    /// Scores on the held-out validation rows
    pub validation: Option<RegressionMetrics>,
}

impl ModelExport {
    pub fn predict(&self, dataset: &Dataset) -> Result<Vec<f64>, ModelError> {
        let matrix = self.features.transform(dataset)?;
        Ok(self.forest.predict(&matrix))
    }

    /// Score against the target column of a labelled dataset
    pub fn score(&self, dataset: &Dataset) -> Result<RegressionMetrics, ModelError> {
        let actual = self.features.targets(dataset)?;
        let predicted = self.predict(dataset)?;
        RegressionMetrics::compute(&actual, &predicted)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let export: ModelExport = serde_json::from_slice(bytes)?;
        if export.format != EXPORT_FORMAT {
            return Err(ModelError::Format(export.format));
        }
        Ok(export)
    }
}

/// Fit preprocessing and forest on `train`, scoring on `validation` when it
/// has rows
pub fn train_model(
    train: &Dataset,
    validation: &Dataset,
    params: &TrainParams,
    cancel: &AtomicBool,
) -> Result<ModelExport, ModelError> {
    let features = FeaturePipeline::fit(train, &params.columns, params.max_tfidf_features)?;
    let x = features.transform(train)?;
    let y = features.targets(train)?;

    let forest = RandomForest::fit_until(&x, &y, &params.forest, cancel)?;

    let mut export = ModelExport {
        format: EXPORT_FORMAT,
        trained_at: Utc::now(),
        feature_names: features.feature_names(),
        features,
        forest,
        params: params.forest.clone(),
        validation: None,
    };

    if !validation.is_empty() {
        export.validation = Some(export.score(validation)?);
    }

    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_perfect_and_constant() {
        let m = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rows, 3);

        let mean_only = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]).unwrap();
        assert!(mean_only.r2.abs() < 1e-12);
        assert!((mean_only.mae - 2.0 / 3.0).abs() < 1e-12);

        assert!(RegressionMetrics::compute(&[], &[]).is_err());
        assert!(RegressionMetrics::compute(&[1.0], &[1.0, 2.0]).is_err());
    }

    fn listings(rows: usize) -> Dataset {
        let mut csv = String::from("name,room_type,neighbourhood_group,minimum_nights,number_of_reviews,reviews_per_month,calculated_host_listings_count,availability_365,longitude,latitude,last_review,price\n");
        for i in 0..rows {
            let (room, group, price) = if i % 2 == 0 {
                ("Entire home/apt", "Manhattan", 200 + i)
            } else {
                ("Private room", "Brooklyn", 70 + i)
            };
            csv.push_str(&format!(
                "Listing {} cozy,{},{},{},{},0.5,1,{},-73.9{},40.7{},2019-05-{:02},{}\n",
                i,
                room,
                group,
                1 + i % 3,
                i,
                i * 10,
                i % 10,
                i % 10,
                1 + i % 28,
                price
            ));
        }
        Dataset::from_csv_bytes(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_train_and_export_roundtrip() {
        let params = TrainParams {
            columns: FeatureColumns::default(),
            forest: ForestParams {
                n_estimators: 10,
                ..ForestParams::default()
            },
            max_tfidf_features: 5,
        };
        let data = listings(30);
        let train = data.select_rows(&(0..24).collect::<Vec<_>>());
        let validation = data.select_rows(&(24..30).collect::<Vec<_>>());

        let export = train_model(&train, &validation, &params, &AtomicBool::new(false)).unwrap();
        let metrics = export.validation.unwrap();
        assert_eq!(metrics.rows, 6);
        assert!(metrics.r2 > 0.5, "r2 was {}", metrics.r2);

        let bytes = export.to_json_bytes().unwrap();
        let restored = ModelExport::from_json_bytes(&bytes).unwrap();
        let before = export.predict(&validation).unwrap();
        let after = restored.predict(&validation).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unknown_export_format_rejected() {
        let params = TrainParams {
            columns: FeatureColumns::default(),
            forest: ForestParams {
                n_estimators: 2,
                ..ForestParams::default()
            },
            max_tfidf_features: 5,
        };
        let data = listings(6);
        let mut export = train_model(&data, &data.empty_like(), &params, &AtomicBool::new(false)).unwrap();
        assert!(export.validation.is_none());

        export.format = 99;
        let bytes = export.to_json_bytes().unwrap();
        assert!(matches!(
            ModelExport::from_json_bytes(&bytes),
            Err(ModelError::Format(99))
        ));
    }
}
