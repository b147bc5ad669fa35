//! Execution scheduler - resolves the stage selector into the run plan

use crate::core::{config::ConfigError, stage::StageKind};

/// Keyword selecting the default stage set
pub const ALL: &str = "all";

/// Resolves `main.steps` against the master list.
///
/// Execution order is always master-list order: the selector only decides
/// membership, so `data_check,basic_cleaning` runs cleaning first.
pub struct ExecutionScheduler;

impl ExecutionScheduler {
    /// Resolve `all` or a comma-separated list of stage names.
    ///
    /// An unknown name fails the whole selector, before any stage runs.
    pub fn resolve(selector: &str) -> Result<Vec<StageKind>, ConfigError> {
        let selector = selector.trim();
        if selector == ALL {
            return Ok(StageKind::MASTER_LIST
                .iter()
                .copied()
                .filter(|kind| kind.runs_on_all())
                .collect());
        }

        let mut selected = Vec::new();
        for name in selector.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let kind = StageKind::from_name(name).ok_or_else(|| ConfigError::UnknownStage {
                name: name.to_string(),
                known: StageKind::known_names(),
            })?;
            selected.push(kind);
        }

        if selected.is_empty() {
            return Err(ConfigError::EmptySelector);
        }

        selected.sort();
        selected.dedup();
        Ok(selected)
    }
}
