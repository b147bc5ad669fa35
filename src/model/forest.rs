//! Random-forest regressor built from CART trees

use crate::model::ModelError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Random-forest hyperparameters, read from the flat `rf_config.json`.
///
/// Keys this forest does not use (`criterion`, `oob_score`, ...) are
/// accepted and ignored so existing configuration files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Unlimited when unset
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
    /// Worker threads; -1 uses every core
    pub n_jobs: i64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Named(MaxFeaturesRule::All),
            bootstrap: true,
            random_state: 42,
            n_jobs: -1,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_estimators == 0 {
            return Err("n_estimators must be at least 1".to_string());
        }
        if self.max_depth == Some(0) {
            return Err("max_depth must be at least 1".to_string());
        }
        if self.min_samples_split < 2 {
            return Err("min_samples_split must be at least 2".to_string());
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be at least 1".to_string());
        }
        if let MaxFeatures::Fraction(f) = self.max_features {
            if !(f > 0.0 && f <= 1.0) {
                return Err(format!("max_features fraction {} is not in (0, 1]", f));
            }
        }
        if self.n_jobs == 0 || self.n_jobs < -1 {
            return Err("n_jobs must be -1 or a positive thread count".to_string());
        }
        Ok(())
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let params: ForestParams = serde_json::from_slice(bytes)?;
        params.validate().map_err(ModelError::InvalidParams)?;
        Ok(params)
    }

    fn threads(&self) -> usize {
        if self.n_jobs > 0 {
            self.n_jobs as usize
        } else {
            0
        }
    }
}

/// Number of features considered at each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxFeatures {
    Fraction(f64),
    Named(MaxFeaturesRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeaturesRule {
    Sqrt,
    Log2,
    All,
    /// Same as `all` for regression
    Auto,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Fraction(f) => (f * n).floor() as usize,
            MaxFeatures::Named(MaxFeaturesRule::Sqrt) => n.sqrt().floor() as usize,
            MaxFeatures::Named(MaxFeaturesRule::Log2) => n.log2().floor() as usize,
            MaxFeatures::Named(MaxFeaturesRule::All | MaxFeaturesRule::Auto) => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree, stored as a flat node list rooted at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    n_candidates: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    cost: f64,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        let mean = indices.iter().map(|&i| self.y[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = self.params.max_depth.map_or(false, |max| depth >= max);
        let pure = indices.iter().all(|&i| (self.y[i] - mean).abs() < 1e-12);
        if depth_reached || pure || indices.len() < self.params.min_samples_split {
            return id;
        }

        let Some(choice) = self.best_split(indices) else {
            return id;
        };

        let (feature, threshold) = (choice.feature, choice.threshold);
        indices.sort_by(|&a, &b| {
            let left_a = self.x[a][feature] <= threshold;
            let left_b = self.x[b][feature] <= threshold;
            left_b.cmp(&left_a).then(a.cmp(&b))
        });
        let n_left = indices
            .iter()
            .filter(|&&i| self.x[i][feature] <= threshold)
            .count();
        let (left_indices, right_indices) = indices.split_at_mut(n_left);

        let left = self.build(left_indices, depth + 1);
        let right = self.build(right_indices, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Lowest summed squared error over a random feature subset
    fn best_split(&mut self, indices: &[usize]) -> Option<SplitChoice> {
        let n_features = self.x.first().map_or(0, Vec::len);
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(&mut self.rng);
        features.truncate(self.n_candidates);
        features.sort_unstable();

        let min_leaf = self.params.min_samples_leaf;
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.y[i] * self.y[i]).sum();

        let mut best: Option<SplitChoice> = None;
        let mut order: Vec<usize> = indices.to_vec();

        for feature in features {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for position in 0..n - 1 {
                let yi = self.y[order[position]];
                left_sum += yi;
                left_sq += yi * yi;

                let n_left = position + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = self.x[order[position]][feature];
                let next = self.x[order[position + 1]][feature];
                if here == next {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let cost = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);

                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    best = Some(SplitChoice {
                        feature,
                        threshold: (here + next) / 2.0,
                        cost,
                    });
                }
            }
        }

        best
    }
}

impl RegressionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams, seed: u64) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut indices: Vec<usize> = if params.bootstrap {
            (0..y.len()).map(|_| rng.gen_range(0..y.len())).collect()
        } else {
            (0..y.len()).collect()
        };

        let mut builder = TreeBuilder {
            x,
            y,
            params,
            n_candidates: params.max_features.resolve(n_features),
            rng,
            nodes: Vec::new(),
        };
        builder.build(&mut indices, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    id = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    /// Fit on a row-major feature matrix.
    ///
    /// Tree `i` is seeded with `random_state + i`, so the fitted forest does
    /// not depend on `n_jobs`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Result<Self, ModelError> {
        Self::fit_until(x, y, params, &AtomicBool::new(false))
    }

    /// Like [`RandomForest::fit`], but stops starting new trees once `cancel`
    /// is set and returns [`ModelError::Cancelled`].
    pub fn fit_until(
        x: &[Vec<f64>],
        y: &[f64],
        params: &ForestParams,
        cancel: &AtomicBool,
    ) -> Result<Self, ModelError> {
        params.validate().map_err(ModelError::InvalidParams)?;
        if y.is_empty() {
            return Err(ModelError::NoRows);
        }
        if x.len() != y.len() {
            return Err(ModelError::Shape(format!(
                "{} feature rows for {} targets",
                x.len(),
                y.len()
            )));
        }
        let n_features = x.first().map_or(0, Vec::len);
        if x.iter().any(|row| row.len() != n_features) {
            return Err(ModelError::Shape("ragged feature matrix".to_string()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads())
            .build()
            .map_err(|e| ModelError::Training(e.to_string()))?;

        let trees = pool
            .install(|| {
                (0..params.n_estimators)
                    .into_par_iter()
                    .map(|i| {
                        if cancel.load(Ordering::Relaxed) {
                            return None;
                        }
                        Some(RegressionTree::fit(
                            x,
                            y,
                            params,
                            params.random_state.wrapping_add(i as u64),
                        ))
                    })
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or(ModelError::Cancelled)?;

        tracing::debug!(
            "Fitted {} trees on {} rows x {} features",
            trees.len(),
            y.len(),
            n_features
        );

        Ok(Self { trees, n_features })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}
