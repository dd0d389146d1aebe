use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use media_migrate::config::{self, AppConfig};
use media_migrate::error::SetupError;
use media_migrate::logging;
use media_migrate::orchestrator::{self, RecordInput, RunSummary};
use media_migrate::util::env;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "migrate_images",
    version,
    about = "Copy product images from their source URLs into blob storage"
)]
struct Cli {
    /// Read records from a CSV file instead of SQL Server
    #[arg(long)]
    records_csv: Option<PathBuf>,
    /// Override RECORD_LIMIT
    #[arg(long)]
    limit: Option<u32>,
    /// Override MAX_CONCURRENCY
    #[arg(long)]
    concurrency: Option<usize>,
    /// Override MAX_ATTEMPTS
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Override REPORT_PATH
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(limit) = self.limit {
            config.record_limit = limit;
        }
        if let Some(n) = self.concurrency {
            config.transfer.max_concurrency = n;
        }
        if let Some(n) = self.max_attempts {
            config.transfer.max_attempts = n;
        }
        if let Some(path) = &self.report {
            config.report_path = path.clone();
        }
    }

    fn input(&self) -> RecordInput {
        match &self.records_csv {
            Some(path) => RecordInput::CsvFile(path.clone()),
            None => RecordInput::SqlServer,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env::init_env();

    let log_file = config::log_file_from_env();
    if let Err(e) = logging::init_tracing("info", Some(&log_file)) {
        eprintln!("{e:#}");
        return ExitCode::from(SetupError::Other(e).exit_code());
    }
    env::bootstrap_cli("migrate_images");

    match run(&cli).await {
        Ok(summary) => {
            info!(
                succeeded = summary.summary.succeeded,
                failed = summary.summary.failed(),
                report = %summary.report_path.display(),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "run aborted");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<RunSummary, SetupError> {
    let input = cli.input();
    let mut config = AppConfig::from_env(input == RecordInput::SqlServer)?;
    cli.apply(&mut config);
    config.validate()?;
    info!(
        max_concurrency = config.transfer.max_concurrency,
        max_attempts = config.transfer.max_attempts,
        record_limit = config.record_limit,
        download_path = %config.download_path.display(),
        "configuration loaded"
    );
    orchestrator::run(&config, input).await
}
