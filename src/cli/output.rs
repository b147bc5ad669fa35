//! CLI output formatting

use crate::{
    artifacts::ArtifactVersion,
    core::{ExecutionStatus, StageState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the active stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage state for display
pub fn format_stage_state(state: &StageState) -> String {
    match state {
        StageState::Pending => style("PENDING").dim().to_string(),
        StageState::Running { .. } => style("RUNNING").yellow().to_string(),
        StageState::Completed { .. } => style("COMPLETED").green().to_string(),
        StageState::Failed { .. } => style("FAILED").red().to_string(),
        StageState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    let mut line = format!(
        "{} {} - {}/{} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.project).bold(),
        summary.run_group,
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if let Some(stage) = &summary.failed_stage {
        line.push_str(&format!(" - failed at {}", style(stage).red()));
    }
    line
}

/// Format an artifact version for display
pub fn format_artifact_version(version: &ArtifactVersion) -> String {
    let aliases = if version.aliases.is_empty() {
        String::new()
    } else {
        format!(" [{}]", version.aliases.join(", "))
    };
    format!(
        "{} {} {} {}{} - {}",
        style(version.tag()).bold(),
        style(&version.artifact_type).cyan(),
        style(&version.digest[..12]).dim(),
        version.size_bytes,
        style(aliases).green(),
        style(version.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            project,
            run_group,
            stages,
        } => format!(
            "{} Starting {}/{} ({}) with {} stage(s)",
            ROCKET,
            style(project).bold(),
            run_group,
            style(short_id(run_id)).dim(),
            stages.len()
        ),
        ExecutionEvent::StageStarted { stage, index, total } => format!(
            "{} [{}/{}] {}",
            SPINNER,
            index,
            total,
            style(stage).cyan()
        ),
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!("{} {} skipped ({})", INFO, style(stage).dim(), reason)
        }
        ExecutionEvent::StageCompleted {
            stage,
            summary,
            outputs,
        } => {
            if outputs.is_empty() {
                format!("{} {}: {}", CHECK, style(stage).green(), summary)
            } else {
                format!(
                    "{} {}: {} → {}",
                    CHECK,
                    style(stage).green(),
                    summary,
                    style(outputs.join(", ")).dim()
                )
            }
        }
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => {
                    format!("{} completed", style("successfully").green())
                }
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => format_status(*other),
            };
            format!("{} Run ({}) {}", INFO, style(short_id(run_id)).dim(), status_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;

    #[test]
    fn test_event_lines_name_the_stage() {
        let line = format_execution_event(&ExecutionEvent::StageFailed {
            stage: StageKind::DataCheck,
            error: "1 check(s) failed".to_string(),
        });
        assert!(console::strip_ansi_codes(&line).contains("data_check"));

        let line = format_execution_event(&ExecutionEvent::StageCompleted {
            stage: StageKind::Download,
            summary: "20 rows".to_string(),
            outputs: vec!["raw_data.csv:v1".to_string()],
        });
        assert!(console::strip_ansi_codes(&line).contains("raw_data.csv:v1"));
    }
}
