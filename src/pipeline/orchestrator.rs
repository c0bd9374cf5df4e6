use super::config::PipelineConfig;
use crate::acquire::{archive, AcquireError, AcquireOutcome, OsfClient, SourceAcquirer};
use crate::classify::classify_project;
use crate::config::ReproConfig;
use crate::container::{ContainerDriver, ContainerError, ContainerRuntime, DockerRuntime, ImageBuilder, Repo2Docker};
use crate::descriptor::{write_descriptor, MetadataSource};
use crate::execute::{ExecutionEngine, ScriptCatalog};
use crate::layout::Workspace;
use crate::logs::{ProjectLogs, Stage};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::project::ProjectId;
use crate::scan::{DependencyExtractor, DependencyScanner, FlowrExtractor};
use anyhow::Context;
use chrono::Local;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("{0:#}")]
    Stage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Source tree holds no `.R`/`.Rmd` files
    NoScripts,
    /// Descriptor stage found no `dependencies.txt`
    NoManifest,
    /// Container listing or catalog left nothing to execute
    NothingExecuted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoScripts => "no R or Rmd scripts",
            SkipReason::NoManifest => "no dependency manifest",
            SkipReason::NothingExecuted => "no scripts selected for execution",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    Completed { scripts: usize, failed: usize },
    Skipped { reason: SkipReason },
    Failed { stage: Stage, error: String },
}

impl ProjectOutcome {
    /// Completed and skipped projects both count as handled
    pub fn is_success(&self) -> bool {
        !matches!(self, ProjectOutcome::Failed { .. })
    }
}

impl fmt::Display for ProjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectOutcome::Completed { scripts, failed } => {
                write!(f, "completed: {} script(s), {} failed", scripts, failed)
            }
            ProjectOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            ProjectOutcome::Failed { stage, error } => write!(f, "failed in {}: {}", stage, error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<(ProjectId, ProjectOutcome)>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.processed() - self.successful()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ProjectOutcome::Skipped { .. }))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Processed {} projects. {} successful, {} failed.",
            self.processed(),
            self.successful(),
            self.failed()
        )
    }
}

/// Collaborators the pipeline drives; swapped for fakes in tests
pub struct PipelineComponents {
    pub osf: Arc<OsfClient>,
    pub extractor: Arc<dyn DependencyExtractor>,
    pub metadata: Arc<dyn MetadataSource>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub builder: Arc<dyn ImageBuilder>,
}

/// Outcome of a stage that may end the project early without failing it
enum Flow<T> {
    Continue(T),
    Skip(SkipReason),
}

pub struct ReproPipeline {
    workspace: Workspace,
    config: PipelineConfig,
    logs: Arc<ProjectLogs>,
    acquirer: SourceAcquirer,
    scanner: DependencyScanner,
    metadata: Arc<dyn MetadataSource>,
    container: ContainerDriver,
    engine: ExecutionEngine,
    progress: Arc<dyn ProgressHandler>,
}

impl ReproPipeline {
    pub fn new(
        workspace: Workspace,
        config: PipelineConfig,
        components: PipelineComponents,
        catalog: Option<Arc<ScriptCatalog>>,
    ) -> Self {
        let logs = Arc::new(ProjectLogs::new(workspace.logs_dir()));
        let progress: Arc<dyn ProgressHandler> = Arc::new(NoOpHandler);

        let engine = ExecutionEngine::new(Arc::clone(&components.runtime), workspace.clone(), Arc::clone(&logs))
            .with_catalog(catalog)
            .with_policy(config.catalog_policy)
            .with_timeout(config.exec_timeout)
            .with_progress(Arc::clone(&progress));

        Self {
            acquirer: SourceAcquirer::new(workspace.clone(), components.osf),
            scanner: DependencyScanner::new(components.extractor),
            metadata: components.metadata,
            container: ContainerDriver::new(components.runtime, components.builder, workspace.clone()),
            engine,
            workspace,
            config,
            logs,
            progress,
        }
    }

    /// Wires the production collaborators: OSF over HTTP, flowR and Docker
    pub fn from_config(config: &ReproConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let workspace = config.workspace();
        workspace
            .ensure_dirs()
            .with_context(|| format!("Failed to create workspace in {}", workspace.root().display()))?;

        let osf = Arc::new(OsfClient::new(
            &config.osf_api_url,
            &config.osf_files_url,
            config.retry_policy(),
            config.http_timeout(),
        )?);
        let runtime = Arc::new(DockerRuntime::connect()?);
        let builder = Arc::new(Repo2Docker::new(
            &config.repo2docker_bin,
            config.docker_user_id,
            &config.docker_user_name,
        ));
        let catalog = ScriptCatalog::load_optional(&workspace.catalog_file())?.map(Arc::new);

        let components = PipelineComponents {
            metadata: Arc::clone(&osf) as Arc<dyn MetadataSource>,
            osf,
            extractor: Arc::new(FlowrExtractor::new(&config.flowr_image)),
            runtime,
            builder,
        };
        Ok(Self::new(workspace, PipelineConfig::from_repro(config), components, catalog))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.engine = self.engine.with_progress(Arc::clone(&progress));
        self.progress = progress;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn logs(&self) -> &ProjectLogs {
        &self.logs
    }

    /// Runs every stage for one project. Never panics or returns an error:
    /// failures are reported through the outcome and the project log.
    pub async fn process_project(&self, id: &ProjectId) -> ProjectOutcome {
        let start = Instant::now();
        self.logs
            .info(id, Stage::Init, &format!("Starting processing for project {}", id));

        let outcome = match self.run_stages(id).await {
            Ok(Flow::Continue((scripts, failed))) => ProjectOutcome::Completed { scripts, failed },
            Ok(Flow::Skip(reason)) => {
                self.progress.on_progress(&ProgressEvent::ProjectSkipped {
                    project: id.to_string(),
                    reason: reason.to_string(),
                });
                ProjectOutcome::Skipped { reason }
            }
            Err((stage, e)) => {
                let error = e.to_string();
                self.logs
                    .error(id, stage, &format!("❌ {} failed: {}", stage, error));
                self.progress.on_progress(&ProgressEvent::ProjectFailed {
                    project: id.to_string(),
                    stage,
                    error: error.clone(),
                });
                ProjectOutcome::Failed { stage, error }
            }
        };

        let elapsed = start.elapsed();
        self.logs.info(
            id,
            Stage::TotalTime,
            &format!(
                "⏳ Total processing time for project {}: {:.2} seconds",
                id,
                elapsed.as_secs_f64()
            ),
        );
        if let ProjectOutcome::Completed { scripts, failed } = &outcome {
            self.progress.on_progress(&ProgressEvent::ProjectComplete {
                project: id.to_string(),
                scripts: *scripts,
                failed: *failed,
                duration: elapsed,
            });
        }
        self.logs.close(id);
        outcome
    }

    async fn run_stages(&self, id: &ProjectId) -> Result<Flow<(usize, usize)>, (Stage, PipelineError)> {
        self.stage(id, Stage::Download, self.download(id)).await?;

        if let Flow::Skip(reason) = self.stage(id, Stage::DependencyExtraction, self.scan(id)).await? {
            return Ok(Flow::Skip(reason));
        }
        if let Flow::Skip(reason) = self.stage(id, Stage::DescriptorSetup, self.describe(id)).await? {
            return Ok(Flow::Skip(reason));
        }

        let image = self.stage(id, Stage::ContainerBuild, self.build(id)).await?;
        if let Some(namespace) = &self.config.push_namespace {
            self.push(id, namespace).await;
        }
        self.stage(id, Stage::ContainerRun, self.run(id, &image)).await?;

        let (scripts, failed) = match self.stage(id, Stage::Execution, self.execute(id)).await? {
            Flow::Continue(counts) => counts,
            Flow::Skip(reason) => return Ok(Flow::Skip(reason)),
        };

        self.stage(id, Stage::ErrorAnalysis, self.classify(id)).await?;
        Ok(Flow::Continue((scripts, failed)))
    }

    /// Times one stage, tagging any error with the stage it came from
    async fn stage<T, F>(&self, id: &ProjectId, stage: Stage, work: F) -> Result<T, (Stage, PipelineError)>
    where
        F: std::future::Future<Output = Result<T, PipelineError>>,
    {
        info!(project = %id, "Phase: {}", stage);
        self.progress.on_progress(&ProgressEvent::StageStarted {
            project: id.to_string(),
            stage,
        });

        let stage_start = Instant::now();
        let value = work.await.map_err(|e| (stage, e))?;

        self.progress.on_progress(&ProgressEvent::StageComplete {
            project: id.to_string(),
            stage,
            duration: stage_start.elapsed(),
        });
        debug!(project = %id, "Phase {} complete", stage);
        Ok(value)
    }

    async fn download(&self, id: &ProjectId) -> Result<(), PipelineError> {
        let outcome = self.acquirer.acquire(id).await?;
        let message = match &outcome {
            AcquireOutcome::Cached(path) => {
                format!("📂 Project already exists at {}, skipping download", path.display())
            }
            AcquireOutcome::Extracted(path) => {
                format!("📦 Extracted cached archive into {}", path.display())
            }
            AcquireOutcome::Downloaded { path, bytes } => {
                format!("✅ Downloaded {} bytes and extracted into {}", bytes, path.display())
            }
            AcquireOutcome::Traversed { path, files } => {
                format!("✅ Downloaded {} files into {}", files, path.display())
            }
        };
        self.logs.info(id, Stage::Download, &message);

        // restoring after each script needs a pristine snapshot
        let zip = self.workspace.archive_path(id);
        if !zip.is_file() {
            let files = archive::pack_directory(outcome.path(), &zip)?;
            self.logs.info(
                id,
                Stage::Download,
                &format!("Snapshot of {} files written to {}", files, zip.display()),
            );
        }
        Ok(())
    }

    async fn scan(&self, id: &ProjectId) -> Result<Flow<()>, PipelineError> {
        let src = self.workspace.source_dir(id);
        let Some(report) = self.scanner.scan(&src).await else {
            self.logs.warn(
                id,
                Stage::DependencyExtraction,
                &format!("No R or Rmd files found in {}", src.display()),
            );
            return Ok(Flow::Skip(SkipReason::NoScripts));
        };

        for (script, reason) in &report.failures {
            self.logs.warn(
                id,
                Stage::DependencyExtraction,
                &format!("⚠️ Could not extract dependencies from {}: {}", script.display(), reason),
            );
        }

        let manifest_path = self.workspace.manifest_path(id);
        report
            .manifest
            .write_to(&manifest_path)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
        self.logs.info(
            id,
            Stage::DependencyExtraction,
            &format!(
                "✅ Dependencies of {} of {} scripts written to {} ({} libraries)",
                report.scanned_ok(),
                report.scripts.len(),
                manifest_path.display(),
                report.manifest.libraries.len()
            ),
        );
        Ok(Flow::Continue(()))
    }

    async fn describe(&self, id: &ProjectId) -> Result<Flow<()>, PipelineError> {
        let project_dir = self.workspace.project_dir(id);
        if !write_descriptor(&project_dir, id, self.metadata.as_ref()).await? {
            self.logs.warn(
                id,
                Stage::DescriptorSetup,
                &format!("⚠️ No dependencies.txt found in {}", project_dir.display()),
            );
            return Ok(Flow::Skip(SkipReason::NoManifest));
        }
        self.logs.info(
            id,
            Stage::DescriptorSetup,
            "✅ DESCRIPTION, postBuild and README.md written",
        );
        Ok(Flow::Continue(()))
    }

    async fn build(&self, id: &ProjectId) -> Result<String, PipelineError> {
        self.container.check_daemon().await?;
        let image = self.container.build(id).await?;
        self.logs
            .info(id, Stage::ContainerBuild, "✅ Container built successfully.");
        Ok(image)
    }

    async fn push(&self, id: &ProjectId, namespace: &str) {
        match self
            .container
            .push(id, namespace, self.config.registry_credentials.clone())
            .await
        {
            Ok(target) => self
                .logs
                .info(id, Stage::ContainerPush, &format!("✅ Image pushed to {}", target)),
            Err(e) => self
                .logs
                .warn(id, Stage::ContainerPush, &format!("⚠️ Image push failed: {}", e)),
        }
    }

    async fn run(&self, id: &ProjectId, image: &str) -> Result<(), PipelineError> {
        let name = self.container.run(id, image).await?;
        self.logs.info(
            id,
            Stage::ContainerRun,
            &format!("✅ Container {} is running", name),
        );

        if self.config.runtime_marker {
            let today = Local::now().format("%Y-%m-%d").to_string();
            if !self.container.write_runtime_marker(id, &today).await {
                self.logs
                    .warn(id, Stage::ContainerRun, "⚠️ Could not record the R runtime version");
            }
        }
        Ok(())
    }

    async fn execute(&self, id: &ProjectId) -> Result<Flow<(usize, usize)>, PipelineError> {
        let summary = self.engine.execute_all(id).await?;
        if summary.executed() == 0 {
            return Ok(Flow::Skip(SkipReason::NothingExecuted));
        }
        Ok(Flow::Continue((summary.executed(), summary.failed())))
    }

    async fn classify(&self, id: &ProjectId) -> Result<(), PipelineError> {
        match classify_project(&self.workspace, id)? {
            Some(rows) => self.logs.info(
                id,
                Stage::ErrorAnalysis,
                &format!("✅ Classified {} result rows", rows),
            ),
            None => self.logs.warn(
                id,
                Stage::ErrorAnalysis,
                "⚠️ Execution log not found, results left unclassified",
            ),
        }
        Ok(())
    }

    /// Processes `ids` one after another; a failing project never stops the batch
    pub async fn process_batch(&self, ids: &[ProjectId]) -> BatchSummary {
        let start = Instant::now();
        let mut summary = BatchSummary::default();

        for (index, id) in ids.iter().enumerate() {
            self.progress.on_progress(&ProgressEvent::ProjectStarted {
                project: id.to_string(),
                index: index + 1,
                total: ids.len(),
            });
            let outcome = self.process_project(id).await;
            info!(project = %id, outcome = %outcome, "Project finished");
            summary.outcomes.push((id.clone(), outcome));
        }
        summary.elapsed = start.elapsed();

        let line = summary.summary_line();
        let total = format!(
            "⏳ Total processing time: {:.2} seconds",
            summary.elapsed.as_secs_f64()
        );
        for (id, _) in &summary.outcomes {
            self.logs.info(id, Stage::Summary, &line);
            self.logs.info(id, Stage::TotalTime, &total);
            self.logs.close(id);
        }

        self.progress.on_progress(&ProgressEvent::BatchComplete {
            processed: summary.processed(),
            successful: summary.successful(),
            failed: summary.failed(),
            total_time: summary.elapsed,
        });
        summary
    }
}
