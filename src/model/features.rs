//! Feature preprocessing: categorical encoding, imputation, date deltas and
//! TF-IDF over listing names

use crate::data::Dataset;
use crate::model::{tfidf::TfidfVectorizer, ModelError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Which columns feed which transformer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureColumns {
    /// Ordinal-encoded categoricals
    pub ordinal: Vec<String>,
    /// One-hot encoded categoricals
    pub one_hot: Vec<String>,
    /// Numeric columns, missing values imputed with zero
    pub numeric: Vec<String>,
    /// Date column converted to days before the newest date
    pub date: Option<String>,
    /// Fill for missing dates (`YYYY-MM-DD`)
    pub date_fill: String,
    /// Free-text column vectorized with TF-IDF
    pub text: Option<String>,
    /// Regression target
    pub target: String,
}

impl Default for FeatureColumns {
    fn default() -> Self {
        Self {
            ordinal: vec!["room_type".to_string()],
            one_hot: vec!["neighbourhood_group".to_string()],
            numeric: [
                "minimum_nights",
                "number_of_reviews",
                "reviews_per_month",
                "calculated_host_listings_count",
                "availability_365",
                "longitude",
                "latitude",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            date: Some("last_review".to_string()),
            date_fill: "2010-01-01".to_string(),
            text: Some("name".to_string()),
            target: "price".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoryEncoder {
    column: String,
    /// Sorted categories seen at fit time
    categories: Vec<String>,
    /// Most frequent category, used for missing values
    fill: Option<String>,
}

impl CategoryEncoder {
    fn fit(dataset: &Dataset, column: &str) -> Result<Self, ModelError> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for value in dataset.text_column(column)?.into_iter().flatten() {
            *counts.entry(value).or_insert(0) += 1;
        }
        // BTreeMap iteration is sorted, so ties go to the smallest category
        let fill = counts
            .iter()
            .fold(None::<(&str, usize)>, |best, (&value, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((value, count)),
            })
            .map(|(value, _)| value.to_string());

        Ok(Self {
            column: column.to_string(),
            categories: counts.keys().map(|c| c.to_string()).collect(),
            fill,
        })
    }

    fn resolve<'a>(&'a self, value: Option<&'a str>) -> Option<&'a str> {
        value.or(self.fill.as_deref())
    }

    /// Position in the sorted categories; unseen categories map to -1
    fn ordinal(&self, value: Option<&str>) -> f64 {
        self.resolve(value)
            .and_then(|v| self.categories.iter().position(|c| c == v))
            .map_or(-1.0, |i| i as f64)
    }

    /// Indicator vector; unseen categories encode as all zeros
    fn one_hot(&self, value: Option<&str>, out: &mut Vec<f64>) {
        let value = self.resolve(value);
        out.extend(
            self.categories
                .iter()
                .map(|c| if Some(c.as_str()) == value { 1.0 } else { 0.0 }),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DateDelta {
    column: String,
    fill: NaiveDate,
    /// Newest date observed at fit time
    reference: NaiveDate,
}

impl DateDelta {
    fn parse(&self, value: Option<&str>) -> NaiveDate {
        value
            .and_then(|v| NaiveDate::parse_from_str(v.trim(), DATE_FORMAT).ok())
            .unwrap_or(self.fill)
    }

    fn days(&self, value: Option<&str>) -> f64 {
        (self.reference - self.parse(value)).num_days() as f64
    }
}

/// Fitted preprocessing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    ordinal: Vec<CategoryEncoder>,
    one_hot: Vec<CategoryEncoder>,
    numeric: Vec<String>,
    date: Option<DateDelta>,
    text: Option<(String, TfidfVectorizer)>,
    target: String,
}

impl FeaturePipeline {
    pub fn fit(
        dataset: &Dataset,
        columns: &FeatureColumns,
        max_tfidf_features: usize,
    ) -> Result<Self, ModelError> {
        if dataset.is_empty() {
            return Err(ModelError::NoRows);
        }

        let ordinal = columns
            .ordinal
            .iter()
            .map(|c| CategoryEncoder::fit(dataset, c))
            .collect::<Result<Vec<_>, _>>()?;
        let one_hot = columns
            .one_hot
            .iter()
            .map(|c| CategoryEncoder::fit(dataset, c))
            .collect::<Result<Vec<_>, _>>()?;

        for column in &columns.numeric {
            dataset.require_column(column)?;
        }
        dataset.require_column(&columns.target)?;

        let date = match &columns.date {
            Some(column) => {
                let fill = NaiveDate::parse_from_str(&columns.date_fill, DATE_FORMAT).map_err(|e| {
                    ModelError::InvalidParams(format!("date_fill '{}': {}", columns.date_fill, e))
                })?;
                let mut delta = DateDelta {
                    column: column.clone(),
                    fill,
                    reference: fill,
                };
                let newest = dataset
                    .text_column(column)?
                    .into_iter()
                    .map(|value| delta.parse(value))
                    .max()
                    .unwrap_or(fill);
                delta.reference = newest;
                Some(delta)
            }
            None => None,
        };

        let text = match &columns.text {
            Some(column) => {
                let documents = dataset.text_column(column)?;
                let vectorizer = TfidfVectorizer::fit(
                    documents.iter().map(|d| d.unwrap_or("")),
                    max_tfidf_features,
                );
                Some((column.clone(), vectorizer))
            }
            None => None,
        };

        Ok(Self {
            ordinal,
            one_hot,
            numeric: columns.numeric.clone(),
            date,
            text,
            target: columns.target.clone(),
        })
    }

    /// Output feature names, in matrix column order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ordinal.iter().map(|e| e.column.clone()).collect();
        for encoder in &self.one_hot {
            names.extend(
                encoder
                    .categories
                    .iter()
                    .map(|c| format!("{}_{}", encoder.column, c)),
            );
        }
        names.extend(self.numeric.iter().cloned());
        if let Some(date) = &self.date {
            names.push(date.column.clone());
        }
        if let Some((column, vectorizer)) = &self.text {
            names.extend(
                vectorizer
                    .vocabulary
                    .iter()
                    .map(|term| format!("{}_{}", column, term)),
            );
        }
        names
    }

    /// Row-major feature matrix
    pub fn transform(&self, dataset: &Dataset) -> Result<Vec<Vec<f64>>, ModelError> {
        let ordinal: Vec<(usize, &CategoryEncoder)> = self
            .ordinal
            .iter()
            .map(|e| -> Result<_, ModelError> { Ok((dataset.require_column(&e.column)?, e)) })
            .collect::<Result<_, ModelError>>()?;
        let one_hot: Vec<(usize, &CategoryEncoder)> = self
            .one_hot
            .iter()
            .map(|e| -> Result<_, ModelError> { Ok((dataset.require_column(&e.column)?, e)) })
            .collect::<Result<_, ModelError>>()?;
        let numeric: Vec<usize> = self
            .numeric
            .iter()
            .map(|c| dataset.require_column(c))
            .collect::<Result<_, _>>()?;
        let date = match &self.date {
            Some(delta) => Some((dataset.require_column(&delta.column)?, delta)),
            None => None,
        };
        let text = match &self.text {
            Some((column, vectorizer)) => Some((dataset.require_column(column)?, vectorizer)),
            None => None,
        };

        let width = self.feature_names().len();
        let matrix = (0..dataset.len())
            .map(|row| {
                let mut features = Vec::with_capacity(width);
                for (index, encoder) in &ordinal {
                    features.push(encoder.ordinal(dataset.cell(row, *index)));
                }
                for (index, encoder) in &one_hot {
                    encoder.one_hot(dataset.cell(row, *index), &mut features);
                }
                for index in &numeric {
                    features.push(dataset.numeric(row, *index).unwrap_or(0.0));
                }
                if let Some((index, delta)) = &date {
                    features.push(delta.days(dataset.cell(row, *index)));
                }
                if let Some((index, vectorizer)) = &text {
                    features.extend(vectorizer.transform(dataset.cell(row, *index).unwrap_or("")));
                }
                features
            })
            .collect();

        Ok(matrix)
    }

    /// Target values; every row must carry a numeric target
    pub fn targets(&self, dataset: &Dataset) -> Result<Vec<f64>, ModelError> {
        let index = dataset.require_column(&self.target)?;
        (0..dataset.len())
            .map(|row| {
                dataset.numeric(row, index).ok_or_else(|| {
                    ModelError::Training(format!(
                        "row {} has no numeric '{}' target",
                        row, self.target
                    ))
                })
            })
            .collect()
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}
