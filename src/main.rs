//! Lambda entry point for the pullhook upload trigger.
//!
//! Each invocation receives a batch of object upload notifications and runs
//! the pull cycle for every record in order.

use aws_lambda_events::event::s3::S3Event;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pullhook::{PullConfig, PullOrchestrator, RusshConnector, S3ObjectStore, TriggerRecord};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    lambda_runtime::run(service_fn(handle)).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn handle(event: LambdaEvent<S3Event>) -> Result<(), Error> {
    let records = TriggerRecord::batch(&event.payload);
    let Some(config) = load_config() else {
        return Ok(());
    };

    let store = S3ObjectStore::for_region(&config.region).await;
    let orchestrator = PullOrchestrator::new(config, store, RusshConnector)?;
    let summary = orchestrator.process_batch(&records).await?;
    info!(
        request_id = %event.context.request_id,
        completed = summary.completed,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch processed"
    );
    Ok(())
}

/// Loads and validates configuration, logging why it is unusable.
fn load_config() -> Option<PullConfig> {
    let loaded = PullConfig::load_without_cli_args()
        .and_then(|config| config.validate().map(|()| config));
    match loaded {
        Ok(config) => Some(config),
        Err(err) => {
            error!(error = %err, "configuration unusable; ending invocation");
            None
        }
    }
}
