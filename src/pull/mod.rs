//! Drives one pull per trigger record.
//!
//! Records are processed strictly in arrival order. For each record the
//! credential is downloaded into a fresh scratch file, parsed, and used to
//! open a session to the control host, which is asked to sync the bucket.
//! The session is closed before the next record starts, so at most one is
//! open at any time.

use tracing::{debug, error, info, warn};

use crate::config::PullConfig;
use crate::error::PullError;
use crate::remote::{CommandPlan, Connector, OutputBuffer, RemoteSession, SessionTarget, execute};
use crate::storage::{CredentialScratch, ObjectStore};
use crate::trigger::TriggerRecord;

/// Counts of what happened to the records of one batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchSummary {
    /// Records whose command completed successfully.
    pub completed: usize,
    /// Records skipped because they name a credential object.
    pub skipped: usize,
    /// Records whose command failed without aborting the batch.
    pub failed: usize,
}

/// Executes the pull flow using the provided object store and connector.
#[derive(Debug)]
pub struct PullOrchestrator<S, C> {
    config: PullConfig,
    target: SessionTarget,
    store: S,
    connector: C,
}

impl<S, C> PullOrchestrator<S, C>
where
    S: ObjectStore,
    C: Connector,
{
    /// Creates a new orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Config`] when the configuration is incomplete.
    pub fn new(config: PullConfig, store: S, connector: C) -> Result<Self, PullError> {
        config.validate()?;
        let target = config.session_target()?;
        Ok(Self {
            config,
            target,
            store,
            connector,
        })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PullConfig {
        &self.config
    }

    /// Processes `records` in order.
    ///
    /// Credential uploads are skipped. Errors other than fatal ones are
    /// logged and the next record is processed.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error (key parsing, dialling, or session
    /// negotiation); remaining records are not processed.
    pub async fn process_batch(
        &self,
        records: &[TriggerRecord],
    ) -> Result<BatchSummary, PullError> {
        let mut summary = BatchSummary::default();
        for record in records {
            if self.config.is_credential_key(&record.key) {
                info!(key = %record.key, "skipping credential object");
                summary.skipped += 1;
                continue;
            }

            info!(
                "[{} - {}] Bucket = {}, Key = {}",
                record.source, record.event_time, record.bucket, record.key
            );
            match self.process_record(record).await {
                Ok(output) => {
                    info!(
                        bucket = %record.bucket,
                        lines = output.line_count(),
                        "pull completed\n{output}"
                    );
                    summary.completed += 1;
                }
                Err(err) => {
                    report_failure(record, &err);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Runs the full cycle for one record and returns the command output.
    ///
    /// Transfer failures are logged and do not stop the cycle; a failed key
    /// download surfaces as a key parse failure instead.
    ///
    /// # Errors
    ///
    /// Returns fatal errors from key parsing and session establishment,
    /// [`PullError::CommandNonZero`] when the command fails, and
    /// [`PullError::Run`] for other run failures.
    pub async fn process_record(&self, record: &TriggerRecord) -> Result<OutputBuffer, PullError> {
        let scratch = CredentialScratch::acquire()?;
        if let Err(err) = scratch
            .fill(&self.store, &record.bucket, &self.config.key_object)
            .await
        {
            warn!(error = %err, "error downloading key file");
        }

        match self.store.fetch(&record.bucket, &record.key).await {
            Ok(size) => debug!(key = %record.key, size, "triggering object is readable"),
            Err(err) => warn!(error = %err, "triggering object check failed"),
        }

        let signer = scratch.signer().await?;
        drop(scratch);

        let mut session = self.connector.connect(&self.target, signer).await?;
        let command = CommandPlan::pull(&self.config, &record.bucket).compose();
        info!(command = %command, "running pull command");

        let result = execute(&mut session, &command).await;
        if let Err(err) = session.close().await {
            warn!(error = %err, "closing SSH session failed");
        }
        result
    }
}

fn report_failure(record: &TriggerRecord, err: &PullError) {
    match err {
        PullError::CommandNonZero { status, output } => warn!(
            bucket = %record.bucket,
            key = %record.key,
            %status,
            "pull completed unsuccessfully\n{output}"
        ),
        _ if err.is_fatal() => {
            error!(bucket = %record.bucket, key = %record.key, error = %err, "aborting invocation");
        }
        _ => error!(bucket = %record.bucket, key = %record.key, error = %err, "pull failed"),
    }
}
