use reprocheck::cli::commands::{CliArgs, Commands};
use reprocheck::cli::handlers::{
    handle_classify, handle_download, handle_merge_logs, handle_report, handle_run,
};
use reprocheck::util::logging::{init_logging, LoggingConfig};
use reprocheck::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(LoggingConfig::from_flags(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("reprocheck v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let work_dir = args.work_dir.as_deref();
    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args, work_dir, args.quiet).await,
        Commands::Download(download_args) => {
            handle_download(download_args, work_dir, args.quiet).await
        }
        Commands::Classify(classify_args) => {
            handle_classify(classify_args, work_dir, args.quiet).await
        }
        Commands::MergeLogs(merge_args) => handle_merge_logs(merge_args, work_dir, args.quiet).await,
        Commands::Report(report_args) => handle_report(report_args, work_dir, args.quiet).await,
    };

    std::process::exit(exit_code);
}
