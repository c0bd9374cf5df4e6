//! Subcommand handlers. Each returns the process exit code.

use crate::acquire::{OsfClient, SourceAcquirer};
use crate::classify::{build_report, classify_project, default_merged_log, merge_logs};
use crate::cli::commands::{DownloadArgs, MergeLogsArgs, ProjectArgs, RunArgs};
use crate::config::ReproConfig;
use crate::execute::{CatalogPolicy, ScriptCatalog};
use crate::pipeline::ReproPipeline;
use crate::progress::LoggingHandler;
use crate::project::{read_project_ids, ProjectId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Environment configuration with the global `--work-dir` override applied
fn load_config(work_dir: Option<&Path>) -> Option<ReproConfig> {
    let mut config = ReproConfig::default();
    if let Some(dir) = work_dir {
        config.work_dir = dir.to_path_buf();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        eprintln!("\nHint: check the REPRO_* environment variables");
        return None;
    }
    Some(config)
}

fn load_ids(input: &str) -> Option<Vec<ProjectId>> {
    match read_project_ids(input) {
        Ok(ids) if ids.is_empty() => {
            error!("No project ids found in {}", input);
            None
        }
        Ok(ids) => Some(ids),
        Err(e) => {
            error!("Failed to read project ids: {:#}", e);
            eprintln!("\nHint: pass a project id such as 'abc12' or a file with one id per line");
            None
        }
    }
}

pub async fn handle_run(args: &RunArgs, work_dir: Option<&Path>, quiet: bool) -> i32 {
    let Some(mut config) = load_config(work_dir) else {
        return 1;
    };
    if let Some(secs) = args.timeout {
        if secs == 0 {
            error!("--timeout must be greater than 0");
            return 1;
        }
        config.exec_timeout_secs = Some(secs);
    }
    if args.strict_catalog {
        config.catalog_policy = CatalogPolicy::Strict;
    }
    if args.push.is_some() {
        config.push_namespace = args.push.clone();
    }

    let Some(ids) = load_ids(&args.input) else {
        return 1;
    };

    info!("Processing {} project(s)", ids.len());

    let pipeline = match ReproPipeline::from_config(&config) {
        Ok(pipeline) => pipeline.with_progress(Arc::new(LoggingHandler)),
        Err(e) => {
            error!("Failed to initialize pipeline: {:#}", e);
            eprintln!("\nHint: make sure the Docker daemon is running and reachable");
            return 1;
        }
    };

    let summary = pipeline.process_batch(&ids).await;

    if !quiet {
        for (id, outcome) in &summary.outcomes {
            println!("{:<12} {}", id, outcome);
        }
        println!("{}", summary.summary_line());
        println!(
            "Results: {}",
            pipeline.workspace().results_file().display()
        );
    }

    if summary.all_succeeded() {
        0
    } else {
        1
    }
}

pub async fn handle_download(args: &DownloadArgs, work_dir: Option<&Path>, quiet: bool) -> i32 {
    let Some(config) = load_config(work_dir) else {
        return 1;
    };
    let workspace = config.workspace();
    if let Err(e) = workspace.ensure_dirs() {
        error!("Failed to create workspace in {}: {}", workspace.root().display(), e);
        return 1;
    }

    let ids = match &args.input {
        Some(input) => match load_ids(input) {
            Some(ids) => ids,
            None => return 1,
        },
        None => {
            let catalog_path = args.catalog.clone().unwrap_or_else(|| workspace.catalog_file());
            match catalog_ids(&catalog_path) {
                Some(ids) => ids,
                None => return 1,
            }
        }
    };

    let client = match OsfClient::new(
        &config.osf_api_url,
        &config.osf_files_url,
        config.retry_policy(),
        config.http_timeout(),
    ) {
        Ok(client) => client.with_progress(!quiet),
        Err(e) => {
            error!("Failed to create OSF client: {}", e);
            return 1;
        }
    };
    let acquirer = SourceAcquirer::new(workspace, Arc::new(client));

    let mut downloaded = 0;
    let mut cached = 0;
    let mut failed = 0;
    for id in &ids {
        match acquirer.prefetch(id).await {
            Ok(true) => downloaded += 1,
            Ok(false) => cached += 1,
            Err(e) => {
                warn!(project = %id, "Download failed: {}", e);
                failed += 1;
            }
        }
        // polite pause between projects
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!(downloaded, cached, failed, "Downloads finished");
    if !quiet {
        println!(
            "Downloaded {}, already present {}, failed {}",
            downloaded, cached, failed
        );
    }

    if failed == 0 {
        0
    } else {
        1
    }
}

fn catalog_ids(path: &Path) -> Option<Vec<ProjectId>> {
    let catalog = match ScriptCatalog::load(path) {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Failed to load catalog: {:#}", e);
            eprintln!("\nHint: pass --catalog or a project id / id file as INPUT");
            return None;
        }
    };

    let mut ids = Vec::new();
    for raw in catalog.project_ids() {
        match ProjectId::new(raw.as_str()) {
            Ok(id) => ids.push(id),
            Err(e) => warn!("Skipping catalog entry '{}': {}", raw, e),
        }
    }
    Some(ids)
}

pub async fn handle_classify(args: &ProjectArgs, work_dir: Option<&Path>, quiet: bool) -> i32 {
    let Some(config) = load_config(work_dir) else {
        return 1;
    };
    let Some(ids) = load_ids(&args.input) else {
        return 1;
    };
    let workspace = config.workspace();

    let mut exit_code = 0;
    for id in &ids {
        match classify_project(&workspace, id) {
            Ok(Some(rows)) => {
                if !quiet {
                    println!("{:<12} {} row(s) classified", id, rows);
                }
            }
            Ok(None) => {
                if !quiet {
                    println!("{:<12} no execution log", id);
                }
            }
            Err(e) => {
                error!(project = %id, "Classification failed: {:#}", e);
                exit_code = 1;
            }
        }
    }
    exit_code
}

pub async fn handle_merge_logs(args: &MergeLogsArgs, work_dir: Option<&Path>, quiet: bool) -> i32 {
    let Some(config) = load_config(work_dir) else {
        return 1;
    };
    let Some(ids) = load_ids(&args.input) else {
        return 1;
    };
    let workspace = config.workspace();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_merged_log(&workspace));

    match merge_logs(&workspace, &ids, &output) {
        Ok(count) => {
            if !quiet {
                println!("Merged {} log(s) into {}", count, output.display());
            }
            0
        }
        Err(e) => {
            error!("Failed to merge logs: {:#}", e);
            1
        }
    }
}

pub async fn handle_report(args: &ProjectArgs, work_dir: Option<&Path>, quiet: bool) -> i32 {
    let Some(config) = load_config(work_dir) else {
        return 1;
    };
    let Some(ids) = load_ids(&args.input) else {
        return 1;
    };
    let workspace = config.workspace();

    match build_report(&workspace, &ids) {
        Ok(report) => {
            if !quiet {
                println!(
                    "Containers built: {}, failed: {}",
                    report.successful.len(),
                    report.failed.len()
                );
                println!("Report written to {}", workspace.results_dir().display());
            }
            0
        }
        Err(e) => {
            error!("Failed to write build report: {:#}", e);
            1
        }
    }
}
