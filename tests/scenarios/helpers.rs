//! Shared fixtures for the pipeline scenarios

use rental_pipeline::{
    artifacts::{ArtifactRef, ArtifactStore, InMemoryArtifactStore},
    core::{RunConfig, StageKind},
    data::Dataset,
    execution::{ExecutionEngine, ExecutionEvent},
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// (neighbourhood_group, price, latitude present)
const LISTINGS: [(&str, u32, bool); 20] = [
    ("Manhattan", 150, true),
    ("Manhattan", 200, true),
    ("Manhattan", 95, true),
    ("Manhattan", 120, true),
    ("Manhattan", 250, true),
    ("Manhattan", 180, true),
    ("Manhattan", 5, true),
    ("Manhattan", 175, true),
    ("Manhattan", 300, true),
    ("Manhattan", 210, false),
    ("Brooklyn", 80, true),
    ("Brooklyn", 90, true),
    ("Brooklyn", 60, true),
    ("Brooklyn", 1200, true),
    ("Brooklyn", 110, true),
    ("Brooklyn", 70, true),
    ("Brooklyn", 130, true),
    ("Brooklyn", 85, true),
    ("Brooklyn", 100, true),
    ("Brooklyn", 65, true),
];

const NAMES: [&str; 5] = [
    "Cozy studio near park",
    "Sunny loft with view",
    "Quiet room in brownstone",
    "Spacious apartment near subway",
    "Charming studio with garden",
];

/// 20 listings: two prices outside [10, 350] and one missing latitude
pub fn sample_csv() -> String {
    let mut csv = String::from(
        "id,name,host_id,host_name,neighbourhood_group,neighbourhood,latitude,longitude,\
         room_type,price,minimum_nights,number_of_reviews,last_review,reviews_per_month,\
         calculated_host_listings_count,availability_365\n",
    );
    for (i, (group, price, has_latitude)) in LISTINGS.iter().enumerate() {
        let (neighbourhood, base_lat, lon) = if *group == "Manhattan" {
            ("Midtown", 40.75, -73.98)
        } else {
            ("Williamsburg", 40.68, -73.95)
        };
        let latitude = if *has_latitude {
            format!("{:.4}", base_lat + i as f64 * 0.001)
        } else {
            String::new()
        };
        let room_type = if i % 3 == 0 { "Private room" } else { "Entire home/apt" };
        csv.push_str(&format!(
            "{},{},{},Host{},{},{},{},{:.4},{},{},{},{},2019-{:02}-15,{:.2},{},{}\n",
            1000 + i,
            NAMES[i % NAMES.len()],
            2000 + i,
            i,
            group,
            neighbourhood,
            latitude,
            lon - i as f64 * 0.001,
            room_type,
            price,
            1 + i % 5,
            10 + i,
            1 + i % 9,
            0.5 + i as f64 * 0.1,
            1 + i % 3,
            100 + i * 5,
        ));
    }
    csv
}

/// Scratch directory holding the sample CSV and the run work roots
pub struct Workspace {
    pub dir: TempDir,
    pub sample: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("sample1.csv");
        std::fs::write(&sample, sample_csv()).unwrap();
        Self { dir, sample }
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    /// Run configuration for `steps`, with small forests and extra overrides
    pub fn config(&self, steps: &str, overrides: &[(&str, &str)]) -> RunConfig {
        config_for(&self.sample, steps, overrides)
    }
}

pub fn config_for(sample: &Path, steps: &str, overrides: &[(&str, &str)]) -> RunConfig {
    let yaml = format!(
        r#"
main:
  project_name: nyc_airbnb
  experiment_name: scenario
  steps: "{}"
etl:
  sample: "{}"
  min_price: 10
  max_price: 350
modeling:
  random_forest:
    n_estimators: 5
    max_depth: 4
    min_samples_leaf: 1
    n_jobs: 1
"#,
        steps,
        sample.display()
    );
    let overrides: Vec<(String, String)> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    RunConfig::from_yaml_with_overrides(&yaml, &overrides).unwrap()
}

/// Engine over `store` that records every event it emits
pub fn recording_engine(
    store: Arc<InMemoryArtifactStore>,
) -> (ExecutionEngine, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let mut engine = ExecutionEngine::new(store);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    (engine, events)
}

/// Stages that emitted `StageStarted`, in order
pub fn started_stages(events: &Mutex<Vec<ExecutionEvent>>) -> Vec<StageKind> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::StageStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

pub async fn latest_dataset(store: &dyn ArtifactStore, name: &str) -> Dataset {
    store
        .fetch(&ArtifactRef::latest(name))
        .await
        .unwrap()
        .dataset()
        .unwrap()
}
