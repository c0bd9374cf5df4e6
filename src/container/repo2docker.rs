use super::{ContainerError, ImageBuilder};
use async_trait::async_trait;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error};

/// Builds images with the `repo2docker` CLI
#[derive(Debug, Clone)]
pub struct Repo2Docker {
    program: String,
    user_id: u32,
    user_name: String,
}

impl Repo2Docker {
    pub fn new(program: impl Into<String>, user_id: u32, user_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            user_id,
            user_name: user_name.into(),
        }
    }

    pub fn build_args(&self, image: &str, context_dir: &Path) -> Vec<String> {
        vec![
            "--no-run".to_string(),
            "--user-id".to_string(),
            self.user_id.to_string(),
            "--user-name".to_string(),
            self.user_name.clone(),
            "--image-name".to_string(),
            image.to_string(),
            context_dir.display().to_string(),
        ]
    }
}

#[async_trait]
impl ImageBuilder for Repo2Docker {
    async fn build(&self, image: &str, context_dir: &Path, log_path: &Path) -> Result<(), ContainerError> {
        let log = File::create(log_path)?;
        let log_err = log.try_clone()?;

        let args = self.build_args(image, context_dir);
        debug!(program = %self.program, args = ?args, "Running image build");

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .status()
            .await
            .map_err(|source| ContainerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            error!(image, status = %status, log = %log_path.display(), "Image build failed");
            return Err(ContainerError::BuildFailed {
                image: image.to_string(),
                status: status.to_string(),
                log: log_path.to_path_buf(),
            });
        }
        Ok(())
    }
}
