//! Script execution inside the project container.
//!
//! Scripts run strictly one after another. Each one leaves exactly three traces,
//! in this order: an execution-log entry, a results row, and a restored source
//! tree, so the next script sees the pristine project again.

mod catalog;

pub use catalog::{select_scripts, CatalogPolicy, CatalogSelection, ScriptCatalog};

use crate::acquire::{archive, restore_source};
use crate::container::{ContainerRuntime, ExecOutput};
use crate::layout::{container_source_dir, Workspace, CONTAINER_MOUNT};
use crate::logs::{ProjectLogs, Stage};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::project::ProjectId;
use crate::results::{ExecutionRecord, ExecutionStatus, ResultsTable};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Extensions searched for inside the container; `find -name` is case-sensitive
pub const SCRIPT_EXTENSIONS: [&str; 4] = [".R", ".Rmd", ".r", ".rmd"];

const ENTRY_SEPARATOR_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    R,
    Rmd,
}

impl ScriptKind {
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".rmd") {
            Some(ScriptKind::Rmd)
        } else if lower.ends_with(".r") {
            Some(ScriptKind::R)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Pending,
    Running,
    Completed(ExecutionStatus),
}

#[derive(Debug, Clone)]
pub struct ScriptRun {
    /// Path relative to `/data`, e.g. `abc12_src/code/main.R`
    pub script: String,
    pub kind: ScriptKind,
    pub state: ScriptState,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ScriptRun {
    pub fn status(&self) -> Option<ExecutionStatus> {
        match self.state {
            ScriptState::Completed(status) => Some(status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub discovered: usize,
    pub runs: Vec<ScriptRun>,
    pub elapsed: Duration,
}

impl ExecutionSummary {
    pub fn executed(&self) -> usize {
        self.runs.len()
    }

    pub fn failed(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.status() == Some(ExecutionStatus::Failed))
            .count()
    }
}

/// Single-quotes `value` for `bash -c`; embedded `'` become `'\''`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Double-quoted R string literal
fn r_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', r"\\").replace('"', "\\\""))
}

/// Command exec'd for `script` (relative to `/data`); `None` for non-R files
pub fn script_command(id: &ProjectId, script: &str) -> Option<Vec<String>> {
    let kind = ScriptKind::from_path(script)?;
    let container_path = format!("{}/{}", CONTAINER_MOUNT, script);
    let (dir, base) = container_path.rsplit_once('/')?;

    let shell = match kind {
        ScriptKind::R => format!("cd {} && Rscript {}", shell_quote(dir), shell_quote(base)),
        ScriptKind::Rmd => {
            let expr = format!(
                "rmarkdown::render({}, output_dir={})",
                r_string(base),
                r_string(&container_source_dir(id))
            );
            format!("cd {} && R -e {}", shell_quote(dir), shell_quote(&expr))
        }
    };
    Some(vec!["bash".to_string(), "-c".to_string(), shell])
}

/// Parses `find` output into paths relative to `/data`
fn parse_listing(stdout: &str) -> impl Iterator<Item = String> + '_ {
    let prefix = format!("{}/", CONTAINER_MOUNT);
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(move |line| line.strip_prefix(prefix.as_str()).unwrap_or(line).to_string())
}

pub struct ExecutionEngine {
    runtime: Arc<dyn ContainerRuntime>,
    workspace: Workspace,
    logs: Arc<ProjectLogs>,
    results: ResultsTable,
    catalog: Option<Arc<ScriptCatalog>>,
    policy: CatalogPolicy,
    timeout: Option<Duration>,
    progress: Arc<dyn ProgressHandler>,
}

impl ExecutionEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, workspace: Workspace, logs: Arc<ProjectLogs>) -> Self {
        let results = ResultsTable::new(workspace.results_file());
        Self {
            runtime,
            workspace,
            logs,
            results,
            catalog: None,
            policy: CatalogPolicy::default(),
            timeout: None,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_catalog(mut self, catalog: Option<Arc<ScriptCatalog>>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_policy(mut self, policy: CatalogPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn results(&self) -> &ResultsTable {
        &self.results
    }

    /// Lists analysis scripts under `/data/<id>_src` inside the running
    /// container, in listing order without duplicates
    pub async fn discover(&self, id: &ProjectId) -> Result<Vec<String>> {
        let container = id.container_name();
        let src_dir = container_source_dir(id);
        let mut seen = HashSet::new();
        let mut scripts = Vec::new();

        for ext in SCRIPT_EXTENSIONS {
            let cmd = vec![
                "find".to_string(),
                src_dir.clone(),
                "-name".to_string(),
                format!("*{}", ext),
            ];
            let output = self
                .runtime
                .exec(&container, cmd)
                .await
                .with_context(|| format!("Failed to list {} files in {}", ext, container))?;

            if !output.success() {
                self.logs.warn(
                    id,
                    Stage::Execution,
                    &format!("Error listing {} files in {}: {}", ext, src_dir, output.stderr.trim()),
                );
                continue;
            }

            for script in parse_listing(&output.stdout) {
                if seen.insert(script.clone()) {
                    scripts.push(script);
                }
            }
        }

        Ok(scripts)
    }

    /// Runs every selected script of the project. Fails when the container is
    /// not running or a restore fails; failing scripts are recorded, not raised.
    pub async fn execute_all(&self, id: &ProjectId) -> Result<ExecutionSummary> {
        let container = id.container_name();
        if !self.runtime.is_running(&container).await? {
            bail!("Container {} is not running", container);
        }

        let discovered = self.discover(id).await?;
        let mut summary = ExecutionSummary {
            discovered: discovered.len(),
            ..Default::default()
        };
        if discovered.is_empty() {
            self.logs.warn(
                id,
                Stage::Execution,
                &format!(
                    "No R or Rmd files found in {} for container {}",
                    container_source_dir(id),
                    container
                ),
            );
            return Ok(summary);
        }

        let expected = self
            .catalog
            .as_ref()
            .map(|c| c.scripts_for(id.as_str()).to_vec())
            .unwrap_or_default();
        let scripts = match select_scripts(&discovered, &expected, self.policy) {
            CatalogSelection::Matched(scripts) => scripts,
            CatalogSelection::Fallback { scripts, reason } => {
                self.logs.warn(id, Stage::Execution, &format!("{}; executing all discovered files", reason));
                scripts
            }
            CatalogSelection::Skipped { reason } => {
                self.logs.warn(id, Stage::Execution, &format!("{}; skipping execution", reason));
                return Ok(summary);
            }
        };

        self.logs.info(
            id,
            Stage::Execution,
            &format!(
                "Found {} R and Rmd files in {}. Executing them now...",
                scripts.len(),
                container_source_dir(id)
            ),
        );

        // the first script starts from the archive too, not from a cached tree
        if self.workspace.archive_path(id).is_file() {
            restore_source(&self.workspace, id)
                .with_context(|| format!("Failed to reset source tree of {}", id))?;
        }
        let pristine = archive::tree_digest(&self.workspace.source_dir(id))
            .with_context(|| format!("Failed to fingerprint source tree of {}", id))?;

        let started = Instant::now();
        let total = scripts.len();
        for (index, script) in scripts.into_iter().enumerate() {
            self.progress.on_progress(&ProgressEvent::ScriptStarted {
                project: id.to_string(),
                script: script.clone(),
                index: index + 1,
                total,
            });

            let run = self.execute_script(id, &script, &pristine).await?;

            if let Some(status) = run.status() {
                self.progress.on_progress(&ProgressEvent::ScriptComplete {
                    project: id.to_string(),
                    script: run.script.clone(),
                    status,
                    duration: run.duration,
                });
            }
            summary.runs.push(run);
        }
        summary.elapsed = started.elapsed();

        self.logs
            .execution(
                id,
                &format!(
                    "⏳ Total execution time for project {}: {:.2} seconds",
                    id,
                    summary.elapsed.as_secs_f64()
                ),
            )
            .context("Failed to write execution log")?;
        self.logs.info(
            id,
            Stage::Execution,
            &format!(
                "Execution completed for project {}. Logs at {}. Results stored in {}",
                id,
                self.workspace.execution_log(id).display(),
                self.results.path().display()
            ),
        );

        Ok(summary)
    }

    async fn execute_script(&self, id: &ProjectId, script: &str, pristine: &str) -> Result<ScriptRun> {
        let container = id.container_name();
        let kind = ScriptKind::from_path(script)
            .with_context(|| format!("{} is not an R or Rmd file", script))?;
        let cmd = script_command(id, script)
            .with_context(|| format!("Cannot build command for {}", script))?;

        let mut run = ScriptRun {
            script: script.to_string(),
            kind,
            state: ScriptState::Pending,
            duration: Duration::ZERO,
            timed_out: false,
        };

        self.logs.info(
            id,
            Stage::Execution,
            &format!("Executing {} in container {}...", script, container),
        );
        run.state = ScriptState::Running;
        let started = Instant::now();
        let output = self.exec_bounded(&container, cmd, &mut run).await;
        run.duration = started.elapsed();

        let status = ExecutionStatus::from_exit_code(output.exit_code);
        debug!(project = %id, script, exit_code = output.exit_code, "Script finished");

        self.write_entry(id, script, status, &output)
            .context("Failed to write execution log")?;

        self.results
            .append(&ExecutionRecord::new(id.as_str(), script, status))?;
        self.logs.info(
            id,
            Stage::Execution,
            &format!("Logged execution result for {} in {}", script, self.results.path().display()),
        );

        self.restore(id, pristine)?;
        run.state = ScriptState::Completed(status);
        Ok(run)
    }

    /// Runs the exec under the configured timeout. Exec errors and timeouts
    /// become a failed output rather than an error.
    async fn exec_bounded(&self, container: &str, cmd: Vec<String>, run: &mut ScriptRun) -> ExecOutput {
        let exec = self.runtime.exec(container, cmd);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, exec).await {
                Ok(result) => result,
                Err(_) => {
                    run.timed_out = true;
                    return ExecOutput {
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: format!("Execution timed out after {} seconds", limit.as_secs()),
                    };
                }
            },
            None => exec.await,
        };

        result.unwrap_or_else(|e| ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: e.to_string(),
        })
    }

    fn write_entry(
        &self,
        id: &ProjectId,
        script: &str,
        status: ExecutionStatus,
        output: &ExecOutput,
    ) -> std::io::Result<()> {
        self.logs.execution(id, &format!("File: {}", script))?;
        match status {
            ExecutionStatus::Successful => self
                .logs
                .execution(id, &format!("Execution Successful:\n{}", output.stdout))?,
            ExecutionStatus::Failed => self
                .logs
                .execution(id, &format!("Execution Failed:\n{}", output.stderr))?,
        }
        self.logs.execution(id, &"=".repeat(ENTRY_SEPARATOR_WIDTH))
    }

    fn restore(&self, id: &ProjectId, pristine: &str) -> Result<()> {
        let src = self.workspace.source_dir(id);
        self.logs.info(
            id,
            Stage::Execution,
            &format!("♻️ Restoring {} from zip file...", src.display()),
        );
        restore_source(&self.workspace, id)
            .with_context(|| format!("Failed to restore {}", src.display()))?;

        match archive::tree_digest(&src) {
            Ok(digest) if digest == pristine => {
                self.logs.info(id, Stage::Execution, "✅ Restore completed.");
            }
            Ok(digest) => self.logs.error(
                id,
                Stage::Execution,
                &format!("Restored tree differs from the original (digest {})", digest),
            ),
            Err(e) => self.logs.error(
                id,
                Stage::Execution,
                &format!("Could not verify restored tree: {}", e),
            ),
        }
        Ok(())
    }
}
