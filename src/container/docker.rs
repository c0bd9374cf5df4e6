use super::{ContainerError, ContainerRuntime, ExecOutput, RegistryCredentials};
use crate::layout::CONTAINER_MOUNT;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{PushImageOptions, TagImageOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::path::Path;
use tracing::{debug, info};

/// Keeps the container alive between execs
const KEEPALIVE_CMD: [&str; 3] = ["tail", "-f", "/dev/null"];

/// [`ContainerRuntime`] backed by the local Docker daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DaemonUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    async fn remove_if_present(&self, name: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                debug!(container = name, "Removed stale container");
                Ok(())
            }
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn split_reference(reference: &str) -> (&str, &str) {
    // a colon after the last slash separates the tag; one before it is a registry port
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => (&reference[..name_start + i], &reference[name_start + i + 1..]),
        None => (reference, "latest"),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::DaemonUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn run_detached(&self, name: &str, image: &str, host_dir: &Path) -> Result<String, ContainerError> {
        self.remove_if_present(name).await?;

        let bind = format!("{}:{}", host_dir.display(), CONTAINER_MOUNT);
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(KEEPALIVE_CMD.iter().map(|s| s.to_string()).collect()),
            user: Some("root".to_string()),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let created = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(container = name, image, "Container started");
        Ok(created.id)
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running) == Some(true)),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    user: Some("root".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let mut result = ExecOutput::default();
        if let StartExecResults::Attached { mut output, .. } = self.docker.start_exec(&exec.id, None).await? {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        result.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        result.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        result.exit_code = inspect.exit_code.unwrap_or(-1);
        debug!(container = name, exit_code = result.exit_code, "Exec finished");
        Ok(result)
    }

    async fn push(
        &self,
        image: &str,
        target: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Result<(), ContainerError> {
        let (repo, tag) = split_reference(target);
        self.docker
            .tag_image(
                image,
                Some(TagImageOptions {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                }),
            )
            .await?;

        let credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username),
            password: Some(c.password),
            ..Default::default()
        });

        let mut progress = self.docker.push_image(
            repo,
            Some(PushImageOptions {
                tag: tag.to_string(),
            }),
            credentials,
        );
        while let Some(update) = progress.next().await {
            let update = update.map_err(|e| ContainerError::PushFailed {
                image: target.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(reason) = update.error {
                return Err(ContainerError::PushFailed {
                    image: target.to_string(),
                    reason,
                });
            }
            if let Some(status) = update.status {
                debug!(target, status = %status, "Push progress");
            }
        }
        Ok(())
    }
}
