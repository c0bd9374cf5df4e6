//! Container build and run.
//!
//! Images are built by repo2docker from the project directory; the container is
//! then kept alive with `tail -f /dev/null` so scripts can be exec'd into it one
//! at a time. Both halves sit behind traits so the pipeline can be driven
//! without a Docker daemon.

mod docker;
mod repo2docker;

pub use docker::DockerRuntime;
pub use repo2docker::Repo2Docker;

use crate::layout::{Workspace, CONTAINER_MOUNT};
use crate::project::ProjectId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Docker daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build of {image} failed ({status}), see {}", .log.display())]
    BuildFailed {
        image: String,
        status: String,
        log: PathBuf,
    },

    #[error("container {0} is not running")]
    NotRunning(String),

    #[error("push of {image} failed: {reason}")]
    PushFailed { image: String, reason: String },

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of one command exec'd inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), ContainerError>;

    /// Force-removes any container called `name`, then starts a detached one
    /// from `image` with `host_dir` bind-mounted read-write at `/data`.
    async fn run_detached(&self, name: &str, image: &str, host_dir: &Path) -> Result<String, ContainerError>;

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError>;

    async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError>;

    async fn push(
        &self,
        image: &str,
        target: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Result<(), ContainerError>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds `image` from `context_dir`, writing all tool output to `log_path`
    async fn build(&self, image: &str, context_dir: &Path, log_path: &Path) -> Result<(), ContainerError>;
}

/// R code that writes `r-<major>.<minor>-<date>` to `/data/runtime.txt`
pub fn runtime_marker_script(date: &str) -> String {
    format!(
        "rver <- paste0(R.version$major, '.', R.version$minor); today <- '{}'; cat(paste0('r-', rver, '-', today), file='{}/runtime.txt')",
        date, CONTAINER_MOUNT
    )
}

pub struct ContainerDriver {
    runtime: Arc<dyn ContainerRuntime>,
    builder: Arc<dyn ImageBuilder>,
    workspace: Workspace,
}

impl ContainerDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, builder: Arc<dyn ImageBuilder>, workspace: Workspace) -> Self {
        Self {
            runtime,
            builder,
            workspace,
        }
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    pub async fn check_daemon(&self) -> Result<(), ContainerError> {
        self.runtime.ping().await
    }

    /// Builds `repo2docker-<id>` and returns the image name. Never retried.
    pub async fn build(&self, id: &ProjectId) -> Result<String, ContainerError> {
        let image = id.image_name();
        let context = self.workspace.project_dir(id);
        let log = self.workspace.build_log(id);
        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(project = %id, image = %image, "Building image with repo2docker");
        self.builder.build(&image, &context, &log).await?;
        Ok(image)
    }

    /// Starts the project container and checks it stays up
    pub async fn run(&self, id: &ProjectId, image: &str) -> Result<String, ContainerError> {
        let name = id.container_name();
        let host_dir = self.workspace.project_dir(id).canonicalize()?;

        self.runtime.run_detached(&name, image, &host_dir).await?;
        if !self.runtime.is_running(&name).await? {
            return Err(ContainerError::NotRunning(name));
        }

        info!(project = %id, container = %name, "Container running");
        Ok(name)
    }

    /// Records the container's R version; best effort
    pub async fn write_runtime_marker(&self, id: &ProjectId, date: &str) -> bool {
        let cmd = vec![
            "Rscript".to_string(),
            "-e".to_string(),
            runtime_marker_script(date),
        ];
        match self.runtime.exec(&id.container_name(), cmd).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                warn!(project = %id, exit_code = output.exit_code, stderr = %output.stderr.trim(), "Runtime marker failed");
                false
            }
            Err(e) => {
                warn!(project = %id, error = %e, "Runtime marker failed");
                false
            }
        }
    }

    /// Tags the image as `<namespace>/repo2docker-<id>` and pushes it
    pub async fn push(
        &self,
        id: &ProjectId,
        namespace: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Result<String, ContainerError> {
        let image = id.image_name();
        let target = format!("{}/{}", namespace.trim_end_matches('/'), image);
        self.runtime.push(&image, &target, credentials).await?;
        info!(project = %id, target = %target, "Image pushed");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
        stays_up: bool,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn ping(&self) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn run_detached(&self, name: &str, image: &str, host_dir: &Path) -> Result<String, ContainerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("run {} {} {}", name, image, host_dir.is_absolute()));
            Ok(name.to_string())
        }

        async fn is_running(&self, _name: &str) -> Result<bool, ContainerError> {
            Ok(self.stays_up)
        }

        async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError> {
            self.calls.lock().unwrap().push(format!("exec {} {}", name, cmd.join(" ")));
            Ok(ExecOutput::default())
        }

        async fn push(
            &self,
            image: &str,
            target: &str,
            _credentials: Option<RegistryCredentials>,
        ) -> Result<(), ContainerError> {
            self.calls.lock().unwrap().push(format!("push {} {}", image, target));
            Ok(())
        }
    }

    struct FailingBuilder;

    #[async_trait]
    impl ImageBuilder for FailingBuilder {
        async fn build(&self, image: &str, _context_dir: &Path, log_path: &Path) -> Result<(), ContainerError> {
            Err(ContainerError::BuildFailed {
                image: image.to_string(),
                status: "exit status: 1".to_string(),
                log: log_path.to_path_buf(),
            })
        }
    }

    fn driver(root: &Path, runtime: Arc<RecordingRuntime>) -> ContainerDriver {
        ContainerDriver::new(runtime, Arc::new(FailingBuilder), Workspace::new(root))
    }

    fn id() -> ProjectId {
        ProjectId::new("abc12").unwrap()
    }

    #[test]
    fn test_runtime_marker_script() {
        let script = runtime_marker_script("2025-03-12");
        assert!(script.contains("today <- '2025-03-12'"));
        assert!(script.contains("file='/data/runtime.txt'"));
    }

    #[tokio::test]
    async fn test_run_mounts_absolute_project_dir() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        std::fs::create_dir_all(ws.project_dir(&id())).unwrap();
        let runtime = Arc::new(RecordingRuntime {
            stays_up: true,
            ..Default::default()
        });

        let name = driver(dir.path(), runtime.clone())
            .run(&id(), "repo2docker-abc12")
            .await
            .unwrap();
        assert_eq!(name, "repo2docker-abc12");
        assert_eq!(
            runtime.calls.lock().unwrap().as_slice(),
            ["run repo2docker-abc12 repo2docker-abc12 true"]
        );
    }

    #[tokio::test]
    async fn test_run_detects_exited_container() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(Workspace::new(dir.path()).project_dir(&id())).unwrap();
        let runtime = Arc::new(RecordingRuntime::default());

        let err = driver(dir.path(), runtime).run(&id(), "img").await.unwrap_err();
        assert!(matches!(err, ContainerError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_build_failure_names_log() {
        let dir = TempDir::new().unwrap();
        let err = driver(dir.path(), Arc::new(RecordingRuntime::default()))
            .build(&id())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("abc12_repo2docker.log"));
    }

    #[tokio::test]
    async fn test_push_target_uses_namespace() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let target = driver(dir.path(), runtime.clone())
            .push(&id(), "registry.example.org/repro/", None)
            .await
            .unwrap();
        assert_eq!(target, "registry.example.org/repro/repo2docker-abc12");
    }

    #[tokio::test]
    async fn test_runtime_marker_execs_rscript() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        assert!(
            driver(dir.path(), runtime.clone())
                .write_runtime_marker(&id(), "2025-01-01")
                .await
        );
        let calls = runtime.calls.lock().unwrap();
        assert!(calls[0].starts_with("exec repo2docker-abc12 Rscript -e rver <- "));
    }
}
