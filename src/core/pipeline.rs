//! Pipeline domain model

use crate::core::{
    config::{ConfigError, RunConfig},
    stage::StageKind,
    state::{ExecutionStatus, RunState, StageState},
};
use std::collections::BTreeMap;

/// One run's view of the master list: which stages are active and how far
/// each one got
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Project the run is attributed to
    pub name: String,

    /// Per-stage state, for every stage in the master list
    pub stages: BTreeMap<StageKind, StageState>,

    /// Run-level state
    pub state: RunState,

    /// Active stages in execution (master-list) order
    execution_order: Vec<StageKind>,
}

impl Pipeline {
    /// Build the run plan from configuration; an unknown stage name fails here,
    /// before anything executes
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let active = config.active_stages()?;
        Ok(Self::with_active(&config.main.project_name, active))
    }

    /// Build a plan from an explicit set of active stages
    pub fn with_active(name: &str, mut active: Vec<StageKind>) -> Self {
        active.sort();
        active.dedup();

        let stages = StageKind::MASTER_LIST
            .iter()
            .map(|kind| {
                let state = if active.contains(kind) {
                    StageState::Pending
                } else {
                    StageState::Skipped {
                        reason: "not selected".to_string(),
                    }
                };
                (*kind, state)
            })
            .collect();

        Pipeline {
            name: name.to_string(),
            stages,
            state: RunState::new(),
            execution_order: active,
        }
    }

    /// Active stages in the order they will run
    pub fn execution_order(&self) -> &[StageKind] {
        &self.execution_order
    }

    pub fn is_active(&self, kind: StageKind) -> bool {
        self.execution_order.contains(&kind)
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageState> {
        self.stages.get(&kind)
    }

    pub fn set_stage_state(&mut self, kind: StageKind, state: StageState) {
        self.stages.insert(kind, state);
    }

    /// Next active stage still pending
    pub fn next_pending(&self) -> Option<StageKind> {
        self.execution_order
            .iter()
            .copied()
            .find(|kind| matches!(self.stages.get(kind), Some(StageState::Pending)))
    }

    /// Mark every still-pending stage as skipped after an abort
    pub fn skip_remaining(&mut self, reason: &str) {
        for state in self.stages.values_mut() {
            if matches!(state, StageState::Pending) {
                *state = StageState::Skipped {
                    reason: reason.to_string(),
                };
            }
        }
    }

    /// Check if every stage reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.values().all(StageState::is_terminal)
    }

    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
    }

    /// Completed active stages, in execution order
    pub fn completed_stages(&self) -> Vec<StageKind> {
        self.execution_order
            .iter()
            .copied()
            .filter(|kind| matches!(self.stages.get(kind), Some(StageState::Completed { .. })))
            .collect()
    }
}
