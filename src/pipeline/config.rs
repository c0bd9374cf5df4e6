use crate::config::ReproConfig;
use crate::container::RegistryCredentials;
use crate::execute::CatalogPolicy;
use std::time::Duration;

/// Per-run knobs of the project pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Per-script bound; `None` waits for every script to finish
    pub exec_timeout: Option<Duration>,
    pub catalog_policy: CatalogPolicy,
    /// Registry namespace to push built images to
    pub push_namespace: Option<String>,
    pub registry_credentials: Option<RegistryCredentials>,
    /// Record the container's R version in `runtime.txt`
    pub runtime_marker: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exec_timeout: None,
            catalog_policy: CatalogPolicy::default(),
            push_namespace: None,
            registry_credentials: None,
            runtime_marker: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_repro(config: &ReproConfig) -> Self {
        let registry_credentials = match (&config.registry_username, &config.registry_password) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            exec_timeout: config.exec_timeout(),
            catalog_policy: config.catalog_policy,
            push_namespace: config.push_namespace.clone(),
            registry_credentials,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_catalog_policy(mut self, policy: CatalogPolicy) -> Self {
        self.catalog_policy = policy;
        self
    }

    pub fn with_push_namespace(mut self, namespace: Option<String>) -> Self {
        self.push_namespace = namespace;
        self
    }

    pub fn with_runtime_marker(mut self, enabled: bool) -> Self {
        self.runtime_marker = enabled;
        self
    }
}
