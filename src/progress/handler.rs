//! Progress handler trait and events

use crate::logs::Stage;
use crate::results::ExecutionStatus;
use std::time::Duration;

/// Events emitted while a batch of projects is processed
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Project picked up from the batch
    ProjectStarted {
        project: String,
        index: usize,
        total: usize,
    },

    /// Pipeline stage started
    StageStarted { project: String, stage: Stage },

    /// Pipeline stage finished without error
    StageComplete {
        project: String,
        stage: Stage,
        duration: Duration,
    },

    /// Script about to be exec'd in the container
    ScriptStarted {
        project: String,
        script: String,
        index: usize,
        total: usize,
    },

    /// Script finished (successfully or not)
    ScriptComplete {
        project: String,
        script: String,
        status: ExecutionStatus,
        duration: Duration,
    },

    /// Project left the pipeline without running any script
    ProjectSkipped { project: String, reason: String },

    /// Project went through every stage
    ProjectComplete {
        project: String,
        scripts: usize,
        failed: usize,
        duration: Duration,
    },

    /// Project aborted in a stage
    ProjectFailed {
        project: String,
        stage: Stage,
        error: String,
    },

    /// Whole batch done
    BatchComplete {
        processed: usize,
        successful: usize,
        failed: usize,
        total_time: Duration,
    },
}

/// Trait for handling progress events during a batch
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.on_progress(&ProgressEvent::ProjectStarted {
            project: "abc12".to_string(),
            index: 1,
            total: 1,
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::ProjectStarted {
            project: "abc12".to_string(),
            index: 1,
            total: 2,
        });
        handler.on_progress(&ProgressEvent::StageComplete {
            project: "abc12".to_string(),
            stage: Stage::Download,
            duration: Duration::from_millis(50),
        });
        handler.on_progress(&ProgressEvent::ProjectComplete {
            project: "abc12".to_string(),
            scripts: 3,
            failed: 1,
            duration: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StageStarted {
            project: "abc12".to_string(),
            stage: Stage::ContainerBuild,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StageStarted"));
        assert!(debug_str.contains("ContainerBuild"));
    }
}
