//! Tabular data: CSV-backed datasets, schema inference and geographic bounds

pub mod dataset;
pub mod schema;

pub use dataset::Dataset;
pub use schema::{ColumnType, Schema};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading or querying a dataset
#[derive(Debug, Error)]
pub enum DataError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("row {row} has {found} fields, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("payload is not valid UTF-8 CSV: {0}")]
    Encoding(String),
}

/// Closed geographic bounding box (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoBox {
    pub min_longitude: f64,
    pub max_longitude: f64,
    pub min_latitude: f64,
    pub max_latitude: f64,
}

impl Default for GeoBox {
    /// New York City
    fn default() -> Self {
        Self {
            min_longitude: -74.25,
            max_longitude: -73.50,
            min_latitude: 40.5,
            max_latitude: 41.2,
        }
    }
}

impl GeoBox {
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.min_longitude
            && longitude <= self.max_longitude
            && latitude >= self.min_latitude
            && latitude <= self.max_latitude
    }

    pub fn validate(&self) -> Result<(), String> {
        let values = [
            self.min_longitude,
            self.max_longitude,
            self.min_latitude,
            self.max_latitude,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("bounds must be finite".to_string());
        }
        if self.min_longitude > self.max_longitude {
            return Err("min_longitude exceeds max_longitude".to_string());
        }
        if self.min_latitude > self.max_latitude {
            return Err("min_latitude exceeds max_latitude".to_string());
        }
        Ok(())
    }
}
