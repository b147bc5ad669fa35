//! Seeded, optionally stratified train/test partitioning

use crate::{
    artifacts::{ArtifactDraft, ArtifactRef},
    core::{
        context::RunContext,
        stage::{Stage, StageError, StageInputs, StageKind, StageOutput, StageParams},
    },
    data::Dataset,
};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use thiserror::Error;

pub const TRAINVAL_ARTIFACT: &str = "trainval_data.csv";
pub const TEST_ARTIFACT: &str = "test_data.csv";
pub const SPLIT_TYPE: &str = "split_data";

/// Label given to rows with no stratification value
const MISSING_GROUP: &str = "<missing>";

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("fraction {0} is not in (0, 1)")]
    InvalidFraction(f64),

    #[error("stratification column '{0}' not found")]
    MissingColumn(String),

    #[error("cannot split an empty dataset")]
    EmptyDataset,

    #[error("group '{group}' has {size} rows; {test_rows} would go to the held-out split")]
    GroupTooSmall {
        group: String,
        size: usize,
        test_rows: usize,
    },
}

/// Partition rows into `(trainval, test)`.
///
/// Each group of the stratification column (or the whole dataset when
/// `stratify_by` is `None`) sends `round(n * test_fraction)` of its rows to
/// `test`. Rows keep their input order within each partition. The same
/// input and seed always give the same partition.
pub fn split(
    dataset: &Dataset,
    test_fraction: f64,
    seed: u64,
    stratify_by: Option<&str>,
) -> Result<(Dataset, Dataset), SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }
    if dataset.is_empty() {
        return Err(SplitError::EmptyDataset);
    }

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    match stratify_by {
        Some(column) => {
            let values = dataset
                .text_column(column)
                .map_err(|_| SplitError::MissingColumn(column.to_string()))?;
            for (row, value) in values.into_iter().enumerate() {
                groups
                    .entry(value.unwrap_or(MISSING_GROUP).to_string())
                    .or_default()
                    .push(row);
            }
        }
        None => {
            groups.insert(String::new(), (0..dataset.len()).collect());
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut in_test = vec![false; dataset.len()];

    for (group, rows) in &groups {
        let size = rows.len();
        let test_rows = (size as f64 * test_fraction).round() as usize;
        if test_rows == 0 || test_rows >= size {
            return Err(SplitError::GroupTooSmall {
                group: group.clone(),
                size,
                test_rows,
            });
        }

        let mut shuffled = rows.clone();
        shuffled.shuffle(&mut rng);
        for &row in &shuffled[..test_rows] {
            in_test[row] = true;
        }
    }

    let (test, trainval): (Vec<usize>, Vec<usize>) =
        (0..dataset.len()).partition(|&row| in_test[row]);

    Ok((dataset.select_rows(&trainval), dataset.select_rows(&test)))
}

/// The `data_split` stage
pub struct DataSplitStage {
    input: ArtifactRef,
    test_size: f64,
    random_seed: u64,
    stratify_by: Option<String>,
}

impl DataSplitStage {
    pub fn new(input: ArtifactRef, test_size: f64, random_seed: u64, stratify_by: Option<String>) -> Self {
        Self {
            input,
            test_size,
            random_seed,
            stratify_by,
        }
    }
}

#[async_trait]
impl Stage for DataSplitStage {
    fn kind(&self) -> StageKind {
        StageKind::DataSplit
    }

    fn inputs(&self) -> Vec<ArtifactRef> {
        vec![self.input.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![TRAINVAL_ARTIFACT.to_string(), TEST_ARTIFACT.to_string()]
    }

    fn params(&self) -> StageParams {
        StageParams::new()
            .with("input", &self.input)
            .with("test_size", self.test_size)
            .with("random_seed", self.random_seed)
            .with("stratify_by", self.stratify_by.as_deref().unwrap_or("none"))
    }

    async fn run(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let dataset = inputs.dataset(&self.input)?;
        let (trainval, test) = split(
            &dataset,
            self.test_size,
            self.random_seed,
            self.stratify_by.as_deref(),
        )?;

        tracing::info!(
            "[{}] Split {} rows into {} trainval / {} test",
            ctx.job_label(self.kind()),
            dataset.len(),
            trainval.len(),
            test.len()
        );

        Ok(StageOutput::new(format!(
            "{} trainval / {} test rows",
            trainval.len(),
            test.len()
        ))
        .with_artifact(ArtifactDraft::from_dataset(
            TRAINVAL_ARTIFACT,
            SPLIT_TYPE,
            "trainval_data dataset",
            &trainval,
        )?)
        .with_artifact(ArtifactDraft::from_dataset(
            TEST_ARTIFACT,
            SPLIT_TYPE,
            "test_data dataset",
            &test,
        )?))
    }
}
