use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use bucketsync::cli::Cli;
use bucketsync::config::FileConfig;
use bucketsync::fs::S3Store;
use bucketsync::sync::{SyncReport, Syncer};
use bucketsync::{logging, SyncError, SyncResult};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) => {
            println!("{}", report);
            // Per-job failures are reported but don't fail the run
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("[ERROR] {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> SyncResult<SyncReport> {
    let file = FileConfig::resolve(cli.config.as_deref())
        .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;

    if let Err(err) = logging::init(&cli.log_level(&file)) {
        eprintln!("Failed to initialize logging: {}", err);
    }

    let plan = cli.plan(&file)?;
    tracing::info!(source = %cli.source, target = %cli.target, "starting sync");

    let store = S3Store::new(
        &plan.bucket,
        &plan.region,
        plan.endpoint.as_deref(),
        &plan.credentials,
    )
    .context("Failed to create S3 client")
    .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;

    let syncer = Syncer::new(Arc::new(store), plan.sync);
    let report = syncer.run().await?;

    for failure in &report.failures {
        tracing::warn!(kind = %failure.kind, path = %failure.source, error = %failure.error, "not synced");
    }
    Ok(report)
}
