//! Configuration management for reprocheck
//!
//! Settings are loaded from environment variables with sensible defaults and can
//! be overridden by command-line flags before validation.
//!
//! # Environment Variables
//!
//! - `REPRO_WORK_DIR`: Workspace root - default: current directory
//! - `REPRO_OSF_API_URL`: OSF JSON API base - default: "https://api.osf.io"
//! - `REPRO_OSF_FILES_URL`: OSF file service base - default: "https://files.osf.io"
//! - `REPRO_RETRY_ATTEMPTS`: Attempts per request on HTTP 429 - default: "3"
//! - `REPRO_RETRY_DELAY_SECS`: Delay between attempts - default: "20"
//! - `REPRO_RETRY_EXPONENTIAL`: Double the delay after every attempt - default: "false"
//! - `REPRO_HTTP_TIMEOUT_SECS`: Per-request timeout - default: "300"
//! - `REPRO_EXEC_TIMEOUT_SECS`: Per-script timeout - default: unbounded
//! - `REPRO_DOCKER_USER_ID` / `REPRO_DOCKER_USER_NAME`: repo2docker user - default: 1000 / "rstudio"
//! - `REPRO_REPO2DOCKER_BIN`: repo2docker executable - default: "repo2docker"
//! - `REPRO_FLOWR_IMAGE`: Dependency extractor image - default: "eagleoutice/flowr"
//! - `REPRO_STRICT_CATALOG`: Skip projects whose catalog matches nothing - default: "false"
//! - `REPRO_PUSH_NAMESPACE`: Registry namespace for pushing built images - default: unset
//! - `REPRO_REGISTRY_USERNAME` / `REPRO_REGISTRY_PASSWORD`: Push credentials - default: unset
//! - `REPRO_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use reprocheck::ReproConfig;
//!
//! let config = ReproConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("workspace: {}", config.work_dir.display());
//! ```

use crate::acquire::RetryPolicy;
use crate::execute::CatalogPolicy;
use crate::layout::Workspace;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OSF_API_URL: &str = "https://api.osf.io";
const DEFAULT_OSF_FILES_URL: &str = "https://files.osf.io";
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 20;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DOCKER_USER_ID: u32 = 1000;
const DEFAULT_DOCKER_USER_NAME: &str = "rstudio";
const DEFAULT_REPO2DOCKER_BIN: &str = "repo2docker";
const DEFAULT_FLOWR_IMAGE: &str = "eagleoutice/flowr";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound for exponential backoff
const MAX_RETRY_DELAY_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct ReproConfig {
    /// Root of the workspace layout
    pub work_dir: PathBuf,

    pub osf_api_url: String,

    pub osf_files_url: String,

    pub retry_attempts: u32,

    pub retry_delay_secs: u64,

    pub retry_exponential: bool,

    pub http_timeout_secs: u64,

    /// Per-script execution bound; `None` waits indefinitely
    pub exec_timeout_secs: Option<u64>,

    pub docker_user_id: u32,

    pub docker_user_name: String,

    pub repo2docker_bin: String,

    pub flowr_image: String,

    pub catalog_policy: CatalogPolicy,

    /// When set, built images are tagged `<namespace>/repo2docker-<id>` and pushed
    pub push_namespace: Option<String>,

    pub registry_username: Option<String>,

    pub registry_password: Option<String>,

    pub log_level: String,
}

impl Default for ReproConfig {
    /// Loads REPRO_* environment variables, falling back to defaults for
    /// anything missing or unparsable.
    fn default() -> Self {
        let work_dir = env::var("REPRO_WORK_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let osf_api_url = env::var("REPRO_OSF_API_URL")
            .unwrap_or_else(|_| DEFAULT_OSF_API_URL.to_string());
        let osf_files_url = env::var("REPRO_OSF_FILES_URL")
            .unwrap_or_else(|_| DEFAULT_OSF_FILES_URL.to_string());

        let retry_attempts = env_parse("REPRO_RETRY_ATTEMPTS").unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        let retry_delay_secs =
            env_parse("REPRO_RETRY_DELAY_SECS").unwrap_or(DEFAULT_RETRY_DELAY_SECS);
        let retry_exponential = env_parse("REPRO_RETRY_EXPONENTIAL").unwrap_or(false);
        let http_timeout_secs =
            env_parse("REPRO_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let exec_timeout_secs = env_parse("REPRO_EXEC_TIMEOUT_SECS");

        let docker_user_id = env_parse("REPRO_DOCKER_USER_ID").unwrap_or(DEFAULT_DOCKER_USER_ID);
        let docker_user_name = env::var("REPRO_DOCKER_USER_NAME")
            .unwrap_or_else(|_| DEFAULT_DOCKER_USER_NAME.to_string());
        let repo2docker_bin = env::var("REPRO_REPO2DOCKER_BIN")
            .unwrap_or_else(|_| DEFAULT_REPO2DOCKER_BIN.to_string());
        let flowr_image =
            env::var("REPRO_FLOWR_IMAGE").unwrap_or_else(|_| DEFAULT_FLOWR_IMAGE.to_string());

        let catalog_policy = if env_parse("REPRO_STRICT_CATALOG").unwrap_or(false) {
            CatalogPolicy::Strict
        } else {
            CatalogPolicy::FallbackToAll
        };

        let push_namespace = env_non_empty("REPRO_PUSH_NAMESPACE");
        let registry_username = env_non_empty("REPRO_REGISTRY_USERNAME");
        let registry_password = env_non_empty("REPRO_REGISTRY_PASSWORD");

        let log_level = env::var("REPRO_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            work_dir,
            osf_api_url,
            osf_files_url,
            retry_attempts,
            retry_delay_secs,
            retry_exponential,
            http_timeout_secs,
            exec_timeout_secs,
            docker_user_id,
            docker_user_name,
            repo2docker_bin,
            flowr_image,
            catalog_policy,
            push_namespace,
            registry_username,
            registry_password,
            log_level,
        }
    }
}

impl ReproConfig {
    /// Validates the configuration
    ///
    /// Checks that:
    /// - At least one request attempt is allowed
    /// - Timeouts, when given, are non-zero
    /// - OSF URLs are http(s)
    /// - Log level is valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "http_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.exec_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "exec_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        for (field, url) in [
            ("osf_api_url", &self.osf_api_url),
            ("osf_files_url", &self.osf_files_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ParseError {
                    field: field.to_string(),
                    error: format!("'{}' is not an http(s) URL", url),
                });
            }
        }

        if self.docker_user_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "docker_user_name must not be empty".to_string(),
            ));
        }

        if self.push_namespace.as_deref() == Some("") {
            return Err(ConfigError::ValidationFailed(
                "push_namespace must not be empty when set".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.work_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.retry_delay_secs);
        if self.retry_exponential {
            RetryPolicy::exponential(
                self.retry_attempts,
                delay,
                Duration::from_secs(MAX_RETRY_DELAY_SECS),
            )
        } else {
            RetryPolicy::fixed(self.retry_attempts, delay)
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout_secs.map(Duration::from_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
