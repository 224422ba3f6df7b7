//! Replays a saved upload notification outside Lambda.
//!
//! Useful for exercising a control host by hand: the event file is the JSON
//! payload an S3 notification delivers, and configuration is read from the
//! same `PULLHOOK_*` variables the Lambda uses.

use std::io::Write as _;

use aws_lambda_events::event::s3::S3Event;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pullhook::{
    CommandPlan, PullConfig, PullOrchestrator, RusshConnector, S3ObjectStore, TriggerRecord,
};

#[derive(Debug, Parser)]
#[command(
    name = "pullhook-replay",
    about = "Run the pull cycle for an S3 notification stored on disk"
)]
struct Cli {
    /// Path to the notification JSON.
    #[arg(long)]
    event: Utf8PathBuf,
    /// Print the command each record would run without contacting anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let raw = std::fs::read_to_string(&cli.event)
        .map_err(|err| format!("reading {} failed: {err}", cli.event))?;
    let event: S3Event = serde_json::from_str(&raw)
        .map_err(|err| format!("parsing {} failed: {err}", cli.event))?;
    let records = TriggerRecord::batch(&event);

    let config = PullConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;

    if cli.dry_run {
        let mut stdout = std::io::stdout();
        for record in &records {
            let line = if config.is_credential_key(&record.key) {
                format!("{}: skipped (credential object)", record.key)
            } else {
                format!(
                    "{}: {}",
                    record.key,
                    CommandPlan::pull(&config, &record.bucket).compose()
                )
            };
            writeln!(stdout, "{line}").map_err(|err| err.to_string())?;
        }
        return Ok(());
    }

    let store = S3ObjectStore::for_region(&config.region).await;
    let orchestrator =
        PullOrchestrator::new(config, store, RusshConnector).map_err(|err| err.to_string())?;
    let summary = orchestrator
        .process_batch(&records)
        .await
        .map_err(|err| err.to_string())?;
    writeln!(
        std::io::stdout(),
        "replay complete: completed={}, skipped={}, failed={}",
        summary.completed,
        summary.skipped,
        summary.failed
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}
