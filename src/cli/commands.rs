use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Automated reproducibility testing for OSF-hosted R projects
#[derive(Parser, Debug)]
#[command(
    name = "reprocheck",
    about = "Automated reproducibility testing for OSF-hosted R projects",
    version,
    author,
    long_about = "reprocheck downloads OSF projects, infers the R packages their analysis \
                  scripts depend on, builds a repo2docker image per project and executes \
                  every script inside it. Each execution is recorded in \
                  results/execution_results.csv and failures are classified."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug output")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Workspace root (overrides REPRO_WORK_DIR)"
    )]
    pub work_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the full pipeline for one or more projects",
        long_about = "Downloads each project, extracts its dependencies, builds and starts a \
                      container and executes every R and Rmd script inside it.\n\n\
                      Examples:\n  \
                      reprocheck run abc12\n  \
                      reprocheck run projects.txt --timeout 1800\n  \
                      reprocheck run abc12 --strict-catalog --push ghcr.io/lab"
    )]
    Run(RunArgs),

    #[command(
        about = "Download project archives without running anything",
        long_about = "Fetches downloads/<id>.zip for every project in the script catalog, or \
                      for the projects given as INPUT.\n\n\
                      Examples:\n  \
                      reprocheck download\n  \
                      reprocheck download --catalog metadata/project_id_r_code_file.csv\n  \
                      reprocheck download projects.txt"
    )]
    Download(DownloadArgs),

    #[command(
        about = "Classify failed executions again",
        long_about = "Re-reads the execution logs and fills the Reason and Error Message \
                      columns of the results table.\n\n\
                      Examples:\n  \
                      reprocheck classify abc12\n  \
                      reprocheck classify projects.txt"
    )]
    Classify(ProjectArgs),

    #[command(
        about = "Merge execution logs into one file",
        long_about = "Concatenates logs/<id>_execution.log of every project under a per-project \
                      header.\n\n\
                      Examples:\n  \
                      reprocheck merge-logs projects.txt\n  \
                      reprocheck merge-logs projects.txt --output all.txt"
    )]
    MergeLogs(MergeLogsArgs),

    #[command(
        about = "Report which projects built a container",
        long_about = "Writes results/successful_projects.csv and results/failed_projects.csv \
                      from the build markers in each project log.\n\n\
                      Examples:\n  \
                      reprocheck report projects.txt"
    )]
    Report(ProjectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        value_name = "INPUT",
        help = "Project id, or a file with one project id per line"
    )]
    pub input: String,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Per-script execution timeout (unbounded by default)"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long,
        help = "Skip execution when the script catalog has no match instead of running every script"
    )]
    pub strict_catalog: bool,

    #[arg(
        long,
        value_name = "NAMESPACE",
        help = "Push built images to <NAMESPACE>/repo2docker-<id>"
    )]
    pub push: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    #[arg(
        value_name = "INPUT",
        help = "Project id or id file (defaults to every project in the catalog)"
    )]
    pub input: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Script catalog CSV (defaults to metadata/project_id_r_code_file.csv)"
    )]
    pub catalog: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(
        value_name = "INPUT",
        help = "Project id, or a file with one project id per line"
    )]
    pub input: String,
}

#[derive(Args, Debug, Clone)]
pub struct MergeLogsArgs {
    #[arg(
        value_name = "INPUT",
        help = "Project id, or a file with one project id per line"
    )]
    pub input: String,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Merged log file (defaults to logs/merged_logs.txt)"
    )]
    pub output: Option<PathBuf>,
}
