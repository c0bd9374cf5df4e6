//! flowR dependency extraction.
//!
//! flowR runs as a throwaway container with the project source mounted at
//! `/data`; its REPL receives a `dependencies` query followed by `exit`, and
//! echoes a JSON reply somewhere in its output.

use super::DependencyManifest;
use crate::layout::CONTAINER_MOUNT;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("no JSON reply in extractor output")]
    NoReply,

    #[error("invalid extractor reply: {0}")]
    InvalidReply(#[from] serde_json::Error),

    #[error("script {0} is outside the source directory")]
    OutsideSource(String),
}

/// Extracts the dependencies of a single script
#[async_trait]
pub trait DependencyExtractor: Send + Sync {
    async fn extract(&self, source_dir: &Path, script: &Path) -> Result<DependencyManifest, ExtractError>;
}

#[derive(Debug, Deserialize, Default)]
struct Reply {
    #[serde(default)]
    dependencies: Dependencies,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Dependencies {
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default)]
    sourced_files: Vec<Sourced>,
    #[serde(default)]
    read_data: Vec<ReadData>,
    #[serde(default)]
    written_data: Vec<WrittenData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Library {
    library_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sourced {
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadData {
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WrittenData {
    destination: Option<String>,
}

fn json_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)(\{.*\})").expect("valid regex"))
}

/// REPL input for one script, path relative to the mounted source directory
pub fn flowr_input(relative_script: &str) -> String {
    format!(
        ":query* \"[{{ \\\"type\\\": \\\"dependencies\\\" }}]\" file://{}/{}\nexit\n",
        CONTAINER_MOUNT, relative_script
    )
}

/// Parses the REPL transcript: the JSON reply follows the echoed `exit`
pub fn parse_flowr_output(stdout: &str) -> Result<DependencyManifest, ExtractError> {
    let reply_text = match stdout.split_once("exit") {
        Some((_, rest)) => rest.trim(),
        None => stdout,
    };

    let json = json_block()
        .captures(reply_text)
        .and_then(|c| c.get(1))
        .ok_or(ExtractError::NoReply)?;
    let reply: Reply = serde_json::from_str(json.as_str())?;
    let deps = reply.dependencies;

    let clean = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    Ok(DependencyManifest {
        libraries: deps.libraries.into_iter().filter_map(|l| clean(l.library_name)).collect(),
        sourced_files: deps.sourced_files.into_iter().filter_map(|s| clean(s.file)).collect(),
        read_data: deps.read_data.into_iter().filter_map(|r| clean(r.source)).collect(),
        written_data: deps
            .written_data
            .into_iter()
            .filter_map(|w| clean(w.destination))
            .collect(),
    })
}

/// Runs `docker run -i --rm -v <src>:/data <image>` once per script
#[derive(Debug, Clone)]
pub struct FlowrExtractor {
    docker_bin: String,
    image: String,
}

impl FlowrExtractor {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            docker_bin: "docker".to_string(),
            image: image.into(),
        }
    }

    pub fn with_docker_bin(mut self, docker_bin: impl Into<String>) -> Self {
        self.docker_bin = docker_bin.into();
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

#[async_trait]
impl DependencyExtractor for FlowrExtractor {
    async fn extract(&self, source_dir: &Path, script: &Path) -> Result<DependencyManifest, ExtractError> {
        let relative = script
            .strip_prefix(source_dir)
            .map_err(|_| ExtractError::OutsideSource(script.display().to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mount_source = source_dir
            .canonicalize()
            .unwrap_or_else(|_| source_dir.to_path_buf());
        let mount = format!("{}:{}", mount_source.display(), CONTAINER_MOUNT);

        debug!(script = %relative, image = %self.image, "Running flowR dependency query");
        let mut child = Command::new(&self.docker_bin)
            .args(["run", "-i", "--rm", "-v", mount.as_str(), self.image.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: self.docker_bin.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(flowr_input(&relative).as_bytes())
                .await
                .map_err(|source| ExtractError::Spawn {
                    program: self.docker_bin.clone(),
                    source,
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: self.docker_bin.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() && stdout.trim().is_empty() {
            return Err(ExtractError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_flowr_output(&stdout)
    }
}
