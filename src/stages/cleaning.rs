//! Basic cleaning: price outliers, incomplete rows and out-of-area listings

use crate::{
    artifacts::{ArtifactDraft, ArtifactRef},
    core::{
        config::RunConfig,
        context::RunContext,
        stage::{Stage, StageError, StageInputs, StageKind, StageOutput, StageParams},
    },
    data::{DataError, Dataset, GeoBox},
};
use async_trait::async_trait;

/// Row filters applied by [`clean_with`]
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningRules {
    pub min_price: f64,
    pub max_price: f64,
    pub bounding_box: GeoBox,
    /// Columns that must be present; empty means every column
    pub required_columns: Vec<String>,
    pub price_column: String,
    pub longitude_column: String,
    pub latitude_column: String,
}

impl CleaningRules {
    pub fn new(min_price: f64, max_price: f64, bounding_box: GeoBox) -> Self {
        Self {
            min_price,
            max_price,
            bounding_box,
            required_columns: Vec::new(),
            price_column: "price".to_string(),
            longitude_column: "longitude".to_string(),
            latitude_column: "latitude".to_string(),
        }
    }
}

/// Cleaned rows plus the row count after each filter
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub dataset: Dataset,
    pub input_rows: usize,
    pub after_price: usize,
    pub after_missing: usize,
    pub after_bounds: usize,
}

/// Drop price outliers, rows with missing values and rows outside `bbox`,
/// in that order
pub fn clean(
    dataset: &Dataset,
    min_price: f64,
    max_price: f64,
    bbox: &GeoBox,
) -> Result<Dataset, DataError> {
    clean_with(dataset, &CleaningRules::new(min_price, max_price, *bbox)).map(|o| o.dataset)
}

/// Apply the cleaning filters. Rows are kept or dropped, never edited; an
/// empty result is valid.
pub fn clean_with(dataset: &Dataset, rules: &CleaningRules) -> Result<CleanOutcome, DataError> {
    let price = dataset.require_column(&rules.price_column)?;
    let longitude = dataset.require_column(&rules.longitude_column)?;
    let latitude = dataset.require_column(&rules.latitude_column)?;
    let required: Vec<usize> = if rules.required_columns.is_empty() {
        (0..dataset.columns().len()).collect()
    } else {
        rules
            .required_columns
            .iter()
            .map(|c| dataset.require_column(c))
            .collect::<Result<_, _>>()?
    };

    let number = |row: &[Option<String>], index: usize| {
        row[index]
            .as_deref()
            .and_then(crate::data::dataset::parse_number)
    };

    let priced = dataset.filter_rows(|row| {
        number(row, price).map_or(false, |p| p >= rules.min_price && p <= rules.max_price)
    });
    tracing::info!("{} rows after price filter", priced.len());

    let complete = priced.filter_rows(|row| required.iter().all(|&i| row[i].is_some()));
    tracing::info!("{} rows after dropping missing values", complete.len());

    let located = complete.filter_rows(|row| match (number(row, longitude), number(row, latitude)) {
        (Some(lon), Some(lat)) => rules.bounding_box.contains(lon, lat),
        _ => false,
    });
    tracing::info!("{} rows inside the bounding box", located.len());

    Ok(CleanOutcome {
        input_rows: dataset.len(),
        after_price: priced.len(),
        after_missing: complete.len(),
        after_bounds: located.len(),
        dataset: located,
    })
}

/// The `basic_cleaning` stage
pub struct BasicCleaningStage {
    input: ArtifactRef,
    output_artifact: String,
    output_type: String,
    output_description: String,
    rules: CleaningRules,
}

impl BasicCleaningStage {
    pub fn new(
        input: ArtifactRef,
        output_artifact: impl Into<String>,
        output_type: impl Into<String>,
        output_description: impl Into<String>,
        rules: CleaningRules,
    ) -> Self {
        Self {
            input,
            output_artifact: output_artifact.into(),
            output_type: output_type.into(),
            output_description: output_description.into(),
            rules,
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, crate::artifacts::ArtifactError> {
        let cleaning = &config.basic_cleaning;
        let rules = CleaningRules {
            required_columns: cleaning.required_columns.clone(),
            ..CleaningRules::new(
                config.etl.min_price,
                config.etl.max_price,
                config.etl.bounding_box,
            )
        };
        Ok(Self::new(
            ArtifactRef::parse(&cleaning.input_artifact)?,
            &cleaning.output_artifact,
            &cleaning.output_type,
            &cleaning.output_description,
            rules,
        ))
    }
}

#[async_trait]
impl Stage for BasicCleaningStage {
    fn kind(&self) -> StageKind {
        StageKind::BasicCleaning
    }

    fn inputs(&self) -> Vec<ArtifactRef> {
        vec![self.input.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.output_artifact.clone()]
    }

    fn params(&self) -> StageParams {
        StageParams::new()
            .with("input_artifact", &self.input)
            .with("output_artifact", &self.output_artifact)
            .with("output_type", &self.output_type)
            .with("min_price", self.rules.min_price)
            .with("max_price", self.rules.max_price)
    }

    async fn run(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let raw = inputs.dataset(&self.input)?;
        tracing::info!(
            "[{}] Cleaning {} rows from {}",
            ctx.job_label(self.kind()),
            raw.len(),
            self.input
        );

        let outcome = clean_with(&raw, &self.rules)?;
        if outcome.dataset.is_empty() {
            tracing::warn!("[{}] No rows survived cleaning", ctx.job_label(self.kind()));
        }

        let draft = ArtifactDraft::from_dataset(
            &self.output_artifact,
            &self.output_type,
            &self.output_description,
            &outcome.dataset,
        )?;

        Ok(StageOutput::new(format!(
            "{} -> {} rows (price {}, complete {}, in area {})",
            outcome.input_rows,
            outcome.after_bounds,
            outcome.after_price,
            outcome.after_missing,
            outcome.after_bounds
        ))
        .with_artifact(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "\
id,name,neighbourhood_group,longitude,latitude,price
1,Loft,Manhattan,-73.98,40.75,150
2,Cheap,Manhattan,-73.98,40.75,5
3,Palace,Brooklyn,-73.95,40.68,1200
4,,Brooklyn,-73.95,40.68,90
5,Far away,Brooklyn,-74.50,40.68,80
6,No lat,Manhattan,-73.98,,120
7,Edge,Manhattan,-74.25,40.5,10
8,Bad price,Manhattan,-73.98,40.75,n/a
";

    fn raw() -> Dataset {
        Dataset::from_csv_bytes(RAW.as_bytes()).unwrap()
    }

    #[test]
    fn test_filters_apply_in_order() {
        let rules = CleaningRules::new(10.0, 350.0, GeoBox::default());
        let outcome = clean_with(&raw(), &rules).unwrap();
        assert_eq!(outcome.input_rows, 8);
        assert_eq!(outcome.after_price, 5);
        assert_eq!(outcome.after_missing, 3);
        assert_eq!(outcome.after_bounds, 2);

        let ids = outcome.dataset.text_column("id").unwrap();
        assert_eq!(ids, vec![Some("1"), Some("7")]);
    }

    #[test]
    fn test_cleaned_rows_satisfy_invariants() {
        let cleaned = clean(&raw(), 10.0, 350.0, &GeoBox::default()).unwrap();
        let bbox = GeoBox::default();
        for row in 0..cleaned.len() {
            let price = cleaned.numeric(row, cleaned.column_index("price").unwrap()).unwrap();
            assert!((10.0..=350.0).contains(&price));
            let lon = cleaned.numeric(row, cleaned.column_index("longitude").unwrap()).unwrap();
            let lat = cleaned.numeric(row, cleaned.column_index("latitude").unwrap()).unwrap();
            assert!(bbox.contains(lon, lat));
            assert!(cleaned.rows()[row].iter().all(Option::is_some));
        }
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let once = clean(&raw(), 10.0, 350.0, &GeoBox::default()).unwrap();
        let twice = clean(&once, 10.0, 350.0, &GeoBox::default()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_required_columns_limit_missing_check() {
        let rules = CleaningRules {
            required_columns: vec!["price".to_string()],
            ..CleaningRules::new(10.0, 350.0, GeoBox::default())
        };
        let outcome = clean_with(&raw(), &rules).unwrap();
        // row 4 has no name but is kept; row 6 still lacks a latitude
        assert_eq!(outcome.after_missing, 5);
        assert_eq!(outcome.after_bounds, 3);
    }

    #[test]
    fn test_nothing_survives_is_valid() {
        let cleaned = clean(&raw(), 2000.0, 3000.0, &GeoBox::default()).unwrap();
        assert!(cleaned.is_empty());
        assert_eq!(cleaned.columns(), raw().columns());
    }

    #[test]
    fn test_missing_price_column() {
        let data = Dataset::from_csv_bytes(b"longitude,latitude\n-73.9,40.7\n").unwrap();
        assert!(matches!(
            clean(&data, 10.0, 350.0, &GeoBox::default()),
            Err(DataError::MissingColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_stage_publishes_clean_data() {
        let rules = CleaningRules::new(10.0, 350.0, GeoBox::default());
        let input = ArtifactRef::parse("raw_data.csv:latest").unwrap();
        let stage = BasicCleaningStage::new(
            input.clone(),
            "clean_sample.csv",
            "clean_data",
            "Data with outliers and null values removed",
            rules,
        );

        let mut inputs = StageInputs::new();
        inputs.insert(
            input,
            crate::artifacts::Artifact {
                meta: crate::artifacts::ArtifactVersion {
                    name: "raw_data.csv".to_string(),
                    version: 1,
                    artifact_type: "raw_data".to_string(),
                    description: String::new(),
                    digest: crate::artifacts::digest(RAW.as_bytes()),
                    size_bytes: RAW.len() as u64,
                    aliases: Vec::new(),
                    created_at: chrono::Utc::now(),
                    run_id: None,
                },
                payload: RAW.as_bytes().to_vec(),
            },
        );

        let ctx = RunContext::new("nyc_airbnb", "test", std::path::Path::new("/tmp"));
        let output = stage.run(&ctx, &inputs).await.unwrap();
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].name, "clean_sample.csv");
        assert_eq!(output.artifacts[0].artifact_type, "clean_data");
        let cleaned = Dataset::from_csv_bytes(&output.artifacts[0].payload).unwrap();
        assert_eq!(cleaned.len(), 2);
    }
}
