//! reprocheck - automated reproducibility testing for OSF-hosted R projects
//!
//! Given an OSF project identifier, the pipeline fetches the project files,
//! infers the R packages and data files the analysis scripts depend on, writes a
//! repo2docker build specification, builds and starts a container, executes
//! every analysis script inside it and records the outcome per script.
//!
//! # Core Concepts
//!
//! - **Workspace**: the fixed on-disk layout (`repos/`, `downloads/`, `logs/`,
//!   `results/`, `metadata/`) shared by every project
//! - **Dependency Manifest**: union of the libraries, sourced files and data
//!   paths found in a project's scripts
//! - **Execution Record**: one row of `results/execution_results.csv`
//!
//! # Example Usage
//!
//! ```ignore
//! use reprocheck::{ProjectId, ReproConfig, ReproPipeline};
//!
//! async fn check(id: &str) -> anyhow::Result<()> {
//!     let config = ReproConfig::default();
//!     let pipeline = ReproPipeline::from_config(&config)?;
//!     let outcome = pipeline.process_project(&ProjectId::new(id)?).await;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod classify;
pub mod cli;
pub mod config;
pub mod container;
pub mod descriptor;
pub mod execute;
pub mod layout;
pub mod logs;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod results;
pub mod scan;
pub mod util;

pub use acquire::{AcquireError, AcquireOutcome, OsfClient, RetryPolicy, SourceAcquirer};
pub use classify::{classify_failure_text, Classification, FailureReason};
pub use config::{ConfigError, ReproConfig};
pub use container::{ContainerDriver, ContainerError, ContainerRuntime, ImageBuilder};
pub use execute::{CatalogPolicy, ExecutionEngine, ScriptCatalog};
pub use layout::Workspace;
pub use logs::{LogKind, ProjectLogs, Stage};
pub use pipeline::{BatchSummary, PipelineConfig, ProjectOutcome, ReproPipeline};
pub use project::ProjectId;
pub use results::{ExecutionRecord, ExecutionStatus, ResultsTable};
pub use scan::{DependencyExtractor, DependencyManifest, DependencyScanner};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
