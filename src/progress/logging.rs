//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use crate::results::ExecutionStatus;
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ProjectStarted {
                project,
                index,
                total,
            } => {
                info!(
                    project = %project,
                    progress = format!("{}/{}", index, total),
                    "Processing project"
                );
            }
            ProgressEvent::StageStarted { project, stage } => {
                debug!(project = %project, stage = %stage, "Starting stage");
            }
            ProgressEvent::StageComplete {
                project,
                stage,
                duration,
            } => {
                debug!(
                    project = %project,
                    stage = %stage,
                    duration_ms = duration.as_millis(),
                    "Stage complete"
                );
            }
            ProgressEvent::ScriptStarted {
                project,
                script,
                index,
                total,
            } => {
                info!(
                    project = %project,
                    script = %script,
                    progress = format!("{}/{}", index, total),
                    "Executing script"
                );
            }
            ProgressEvent::ScriptComplete {
                project,
                script,
                status,
                duration,
            } => match status {
                ExecutionStatus::Successful => info!(
                    project = %project,
                    script = %script,
                    duration_ms = duration.as_millis(),
                    "Script succeeded"
                ),
                ExecutionStatus::Failed => warn!(
                    project = %project,
                    script = %script,
                    duration_ms = duration.as_millis(),
                    "Script failed"
                ),
            },
            ProgressEvent::ProjectSkipped { project, reason } => {
                warn!(project = %project, reason = %reason, "Project skipped");
            }
            ProgressEvent::ProjectComplete {
                project,
                scripts,
                failed,
                duration,
            } => {
                info!(
                    project = %project,
                    scripts,
                    failed,
                    duration_ms = duration.as_millis(),
                    "Project complete"
                );
            }
            ProgressEvent::ProjectFailed {
                project,
                stage,
                error,
            } => {
                warn!(project = %project, stage = %stage, error = %error, "Project failed");
            }
            ProgressEvent::BatchComplete {
                processed,
                successful,
                failed,
                total_time,
            } => {
                info!(
                    processed,
                    successful,
                    failed,
                    total_time_ms = total_time.as_millis(),
                    "Batch complete"
                );
            }
        }
    }
}
