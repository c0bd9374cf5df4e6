//! Per-project append-only log files.
//!
//! Every `(project, kind)` pair owns exactly one lazily opened file handle that is
//! reused for the lifetime of the registry and flushed after every entry. Entries
//! share one line format:
//!
//! ```text
//! [2025-04-11 09:30:12] [abc12] [R EXECUTION] File: abc12_src/analysis.R
//! ```

use crate::project::ProjectId;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// `logs/<id>.log`: stage messages, mirrored to the console
    Project,
    /// `logs/<id>_execution.log`: raw script output, file only
    Execution,
}

/// Pipeline stage tag written into every log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Download,
    DependencyExtraction,
    DescriptorSetup,
    ContainerBuild,
    ContainerRun,
    ContainerPush,
    Execution,
    ErrorAnalysis,
    TotalTime,
    Summary,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "PROJECT INIT",
            Stage::Download => "DOWNLOAD",
            Stage::DependencyExtraction => "DEPENDENCY EXTRACTION",
            Stage::DescriptorSetup => "REPO2DOCKER SETUP",
            Stage::ContainerBuild => "CONTAINER BUILD",
            Stage::ContainerRun => "CONTAINER RUN",
            Stage::ContainerPush => "CONTAINER PUSH",
            Stage::Execution => "R EXECUTION",
            Stage::ErrorAnalysis => "ERROR ANALYSIS",
            Stage::TotalTime => "TOTAL TIME",
            Stage::Summary => "SUMMARY",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn format_entry(timestamp: &DateTime<Local>, project: &str, stage: Stage, message: &str) -> String {
    format!(
        "[{}] [{}] [{}] {}",
        timestamp.format("%Y-%m-%d %H:%M:%S"),
        project,
        stage,
        message
    )
}

type SinkKey = (String, LogKind);

pub struct ProjectLogs {
    logs_dir: PathBuf,
    sinks: Mutex<HashMap<SinkKey, BufWriter<File>>>,
}

impl ProjectLogs {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn path_for(&self, project: &ProjectId, kind: LogKind) -> PathBuf {
        match kind {
            LogKind::Project => self.logs_dir.join(format!("{}.log", project)),
            LogKind::Execution => self.logs_dir.join(format!("{}_execution.log", project)),
        }
    }

    /// Appends one timestamped entry and flushes it to disk
    pub fn append(
        &self,
        project: &ProjectId,
        kind: LogKind,
        stage: Stage,
        message: &str,
    ) -> io::Result<()> {
        let line = format_entry(&Local::now(), project.as_str(), stage, message);
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());

        let key = (project.as_str().to_string(), kind);
        if !sinks.contains_key(&key) {
            let file = self.open_sink(project, kind)?;
            sinks.insert(key.clone(), BufWriter::new(file));
        }

        if let Some(sink) = sinks.get_mut(&key) {
            writeln!(sink, "{}", line)?;
            sink.flush()?;
        }
        Ok(())
    }

    fn open_sink(&self, project: &ProjectId, kind: LogKind) -> io::Result<File> {
        fs::create_dir_all(&self.logs_dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(project, kind))
    }

    /// Stage message: console (via tracing, at `level`) plus `logs/<id>.log`.
    /// A failing log file never aborts the caller.
    pub fn record(&self, project: &ProjectId, stage: Stage, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(project = %project, stage = %stage, "{}", message),
            Level::WARN => warn!(project = %project, stage = %stage, "{}", message),
            _ => info!(project = %project, stage = %stage, "{}", message),
        }

        if let Err(e) = self.append(project, LogKind::Project, stage, message) {
            warn!(project = %project, error = %e, "Failed to write project log");
        }
    }

    pub fn info(&self, project: &ProjectId, stage: Stage, message: &str) {
        self.record(project, stage, Level::INFO, message);
    }

    pub fn warn(&self, project: &ProjectId, stage: Stage, message: &str) {
        self.record(project, stage, Level::WARN, message);
    }

    pub fn error(&self, project: &ProjectId, stage: Stage, message: &str) {
        self.record(project, stage, Level::ERROR, message);
    }

    /// Raw script output; goes to `logs/<id>_execution.log` only
    pub fn execution(&self, project: &ProjectId, message: &str) -> io::Result<()> {
        self.append(project, LogKind::Execution, Stage::Execution, message)
    }

    /// Flushes and drops every handle held for `project`
    pub fn close(&self, project: &ProjectId) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        sinks.retain(|(id, _), sink| {
            if id == project.as_str() {
                let _ = sink.flush();
                false
            } else {
                true
            }
        });
    }

    pub fn open_handles(&self) -> usize {
        self.sinks.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl fmt::Debug for ProjectLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectLogs")
            .field("logs_dir", &self.logs_dir)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn id(s: &str) -> ProjectId {
        ProjectId::new(s).unwrap()
    }

    #[test]
    fn test_format_entry() {
        let ts = Local.with_ymd_and_hms(2025, 4, 11, 9, 30, 12).unwrap();
        assert_eq!(
            format_entry(&ts, "abc12", Stage::Execution, "File: a.R"),
            "[2025-04-11 09:30:12] [abc12] [R EXECUTION] File: a.R"
        );
    }

    #[test]
    fn test_entries_are_appended_and_flushed() {
        let dir = TempDir::new().unwrap();
        let logs = ProjectLogs::new(dir.path().join("logs"));
        let project = id("abc12");

        logs.info(&project, Stage::Download, "first");
        logs.warn(&project, Stage::Download, "second");

        let content = fs::read_to_string(logs.path_for(&project, LogKind::Project)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[abc12] [DOWNLOAD] first"));
        assert!(lines[1].ends_with("[abc12] [DOWNLOAD] second"));
    }

    #[test]
    fn test_one_handle_per_project_and_kind() {
        let dir = TempDir::new().unwrap();
        let logs = ProjectLogs::new(dir.path());
        let a = id("aaaaa");
        let b = id("bbbbb");

        logs.info(&a, Stage::Init, "x");
        logs.info(&a, Stage::Init, "y");
        logs.execution(&a, "out").unwrap();
        logs.info(&b, Stage::Init, "z");
        assert_eq!(logs.open_handles(), 3);

        logs.close(&a);
        assert_eq!(logs.open_handles(), 1);
    }

    #[test]
    fn test_execution_entries_stay_out_of_project_log() {
        let dir = TempDir::new().unwrap();
        let logs = ProjectLogs::new(dir.path());
        let project = id("abc12");

        logs.execution(&project, "Execution Successful:\nok").unwrap();

        assert!(!logs.path_for(&project, LogKind::Project).exists());
        let exec = fs::read_to_string(logs.path_for(&project, LogKind::Execution)).unwrap();
        assert!(exec.contains("[R EXECUTION] Execution Successful:\nok"));
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let project = id("abc12");

        ProjectLogs::new(dir.path()).info(&project, Stage::Init, "run one");
        ProjectLogs::new(dir.path()).info(&project, Stage::Init, "run two");

        let content = fs::read_to_string(dir.path().join("abc12.log")).unwrap();
        assert!(content.contains("run one"));
        assert!(content.contains("run two"));
    }
}
