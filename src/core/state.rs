//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every active stage completed
    Completed,
    /// A stage failed and the run was aborted
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Completed" => Some(ExecutionStatus::Completed),
            "Failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// State of a single stage within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Selected, waiting for its turn
    Pending,
    /// Currently executing
    Running {
        started_at: DateTime<Utc>,
    },
    /// Finished and its outputs were published
    Completed {
        summary: String,
        outputs: Vec<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Raised an error; the run stops here
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Not run (not selected, or aborted after an earlier failure)
    Skipped {
        reason: String,
    },
}

impl StageState {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Completed { .. } | StageState::Failed { .. } | StageState::Skipped { .. }
        )
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of active stages
    pub total_stages: usize,

    /// Number of completed stages
    pub completed_stages: usize,

    /// Stage that aborted the run, if any
    pub failed_stage: Option<String>,

    /// Run id, assigned when the run starts
    pub run_id: Option<Uuid>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stage: None,
            run_id: None,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, run_id: Uuid, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.run_id = Some(run_id);
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    pub fn stage_completed(&mut self) {
        self.completed_stages += 1;
    }

    /// Mark run as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark run as failed
    pub fn fail(&mut self, stage: &str) {
        self.status = ExecutionStatus::Failed;
        self.failed_stage = Some(stage.to_string());
        self.completed_at = Some(Utc::now());
    }

    /// Fraction of active stages completed (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_state_is_terminal() {
        assert!(!StageState::Pending.is_terminal());
        assert!(!StageState::Running {
            started_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Completed {
            summary: "ok".to_string(),
            outputs: vec![],
            started_at: Utc::now(),
            completed_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Failed {
            error: "boom".to_string(),
            started_at: Utc::now(),
            failed_at: Utc::now()
        }
        .is_terminal());
        assert!(StageState::Skipped {
            reason: "not selected".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_run_progress() {
        let mut state = RunState::new();
        state.start(Uuid::new_v4(), 4);
        assert_eq!(state.progress(), 0.0);

        state.stage_completed();
        state.stage_completed();
        assert_eq!(state.progress(), 0.5);

        state.fail("data_check");
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.failed_stage.as_deref(), Some("data_check"));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
    }
}
