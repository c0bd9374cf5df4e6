//! Shared fakes for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use reprocheck::acquire::{archive, OsfClient, RetryPolicy};
use reprocheck::container::{ContainerError, ContainerRuntime, ExecOutput, ImageBuilder, RegistryCredentials};
use reprocheck::descriptor::{MetadataSource, ProjectMetadata};
use reprocheck::execute::ScriptCatalog;
use reprocheck::pipeline::{PipelineComponents, PipelineConfig, ReproPipeline};
use reprocheck::scan::{DependencyExtractor, DependencyManifest, ExtractError};
use reprocheck::{ProjectId, Workspace};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Container runtime that lists a fixed set of scripts and answers every
/// script exec with the same exit code
pub struct FakeRuntime {
    /// Paths as `find` prints them, e.g. `/data/abc12_src/main.R`
    pub listing: Vec<String>,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Sleep before answering a script exec
    pub script_delay: Option<Duration>,
    /// Host side of the mounted source tree, fingerprinted before every script exec
    pub source_dir: Option<PathBuf>,
    /// Scripts write `output.csv` into `source_dir`, as real analyses do
    pub writes_output: bool,
    /// Script execs whose command contains this text exit with status 1
    pub fail_on: Option<String>,
    pub execs: Mutex<Vec<Vec<String>>>,
    pub digests: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn with_scripts(listing: &[&str]) -> Self {
        Self {
            listing: listing.iter().map(|s| s.to_string()).collect(),
            exit_code: 0,
            stdout: "[1] \"done\"".to_string(),
            stderr: String::new(),
            script_delay: None,
            source_dir: None,
            writes_output: false,
            fail_on: None,
            execs: Mutex::new(Vec::new()),
            digests: Mutex::new(Vec::new()),
        }
    }

    pub fn watching(mut self, source_dir: PathBuf) -> Self {
        self.source_dir = Some(source_dir);
        self
    }

    pub fn writing_output(mut self) -> Self {
        self.writes_output = true;
        self
    }

    pub fn failing_on(mut self, needle: &str, stderr: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self.stderr = stderr.to_string();
        self
    }

    pub fn seen_digests(&self) -> Vec<String> {
        self.digests.lock().unwrap().clone()
    }

    pub fn failing(mut self, exit_code: i64, stderr: &str) -> Self {
        self.exit_code = exit_code;
        self.stderr = stderr.to_string();
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.script_delay = Some(delay);
        self
    }

    pub fn script_execs(&self) -> Vec<Vec<String>> {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.first().map(String::as_str) == Some("bash"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn run_detached(&self, name: &str, _image: &str, _host_dir: &Path) -> Result<String, ContainerError> {
        Ok(format!("{}-id", name))
    }

    async fn is_running(&self, _name: &str) -> Result<bool, ContainerError> {
        Ok(true)
    }

    async fn exec(&self, _name: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError> {
        self.execs.lock().unwrap().push(cmd.clone());

        match cmd.first().map(String::as_str) {
            Some("find") => {
                let pattern = cmd.last().cloned().unwrap_or_default();
                let ext = pattern.trim_start_matches('*');
                let stdout = self
                    .listing
                    .iter()
                    .filter(|path| path.ends_with(ext))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ExecOutput {
                    exit_code: 0,
                    stdout,
                    stderr: String::new(),
                })
            }
            Some("bash") => {
                if let Some(src) = &self.source_dir {
                    let digest = archive::tree_digest(src).unwrap();
                    self.digests.lock().unwrap().push(digest);
                    if self.writes_output {
                        fs::write(src.join("output.csv"), cmd.join(" ")).unwrap();
                    }
                }
                if let Some(delay) = self.script_delay {
                    tokio::time::sleep(delay).await;
                }
                let exit_code = match &self.fail_on {
                    Some(needle) if cmd.iter().any(|arg| arg.contains(needle.as_str())) => 1,
                    Some(_) => 0,
                    None => self.exit_code,
                };
                let stderr = if exit_code == 0 { String::new() } else { self.stderr.clone() };
                Ok(ExecOutput {
                    exit_code,
                    stdout: self.stdout.clone(),
                    stderr,
                })
            }
            _ => Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    async fn push(
        &self,
        _image: &str,
        _target: &str,
        _credentials: Option<RegistryCredentials>,
    ) -> Result<(), ContainerError> {
        Ok(())
    }
}

pub struct FakeBuilder;

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, image: &str, _context_dir: &Path, log_path: &Path) -> Result<(), ContainerError> {
        fs::write(log_path, format!("Successfully built {}\n", image))?;
        Ok(())
    }
}

/// Reports the same library for every script
pub struct FakeExtractor;

#[async_trait]
impl DependencyExtractor for FakeExtractor {
    async fn extract(&self, _source_dir: &Path, _script: &Path) -> Result<DependencyManifest, ExtractError> {
        let mut manifest = DependencyManifest::default();
        manifest.libraries.insert("ggplot2".to_string());
        Ok(manifest)
    }
}

pub struct FakeMetadata;

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn project_metadata(&self, id: &ProjectId) -> anyhow::Result<ProjectMetadata> {
        Ok(ProjectMetadata {
            title: format!("Project {}", id),
            description: "Test project".to_string(),
        })
    }
}

/// OSF client pointed at a closed port; any network use fails fast
pub fn offline_osf() -> Arc<OsfClient> {
    Arc::new(
        OsfClient::new(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            RetryPolicy::fixed(1, Duration::ZERO),
            Duration::from_secs(1),
        )
        .unwrap()
        .with_progress(false),
    )
}

/// Writes `files` into the project's source directory and snapshots it to
/// `downloads/<id>.zip`, as a finished download would
pub fn seed_project(workspace: &Workspace, id: &ProjectId, files: &[(&str, &str)]) {
    workspace.ensure_dirs().unwrap();
    let src = workspace.source_dir(id);
    fs::create_dir_all(&src).unwrap();
    for (name, content) in files {
        let path = src.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    archive::pack_directory(&src, &workspace.archive_path(id)).unwrap();
}

pub fn pipeline(workspace: &Workspace, runtime: Arc<FakeRuntime>, config: PipelineConfig) -> ReproPipeline {
    pipeline_with_catalog(workspace, runtime, config, None)
}

pub fn pipeline_with_catalog(
    workspace: &Workspace,
    runtime: Arc<FakeRuntime>,
    config: PipelineConfig,
    catalog: Option<ScriptCatalog>,
) -> ReproPipeline {
    let components = PipelineComponents {
        osf: offline_osf(),
        extractor: Arc::new(FakeExtractor),
        metadata: Arc::new(FakeMetadata),
        runtime,
        builder: Arc::new(FakeBuilder),
    };
    ReproPipeline::new(workspace.clone(), config, components, catalog.map(Arc::new))
}
