//! Composition of the command line sent to the control host.
//!
//! The pull is an ordered list of shell steps joined into a single line so
//! additional steps can be appended without touching the composer.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;

use crate::config::PullConfig;

/// Separator placed between composed steps.
const STATEMENT_SEPARATOR: &str = "; ";

/// Synchronisation of a bucket into a directory on the control host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncStep {
    /// Bucket to pull from.
    pub bucket: String,
    /// Local directory on the control host.
    pub target_dir: Utf8PathBuf,
    /// Pattern excluded from the transfer.
    pub exclude_pattern: String,
}

impl SyncStep {
    /// Renders the `aws s3 sync` invocation. Only the bucket and directory
    /// are escaped; the exclude pattern is passed through for the CLI to
    /// match.
    #[must_use]
    pub fn render(&self) -> String {
        let escaped_bucket = escape(self.bucket.as_str().into());
        let escaped_target = escape(self.target_dir.as_str().into());
        format!(
            "sudo aws s3 sync s3://{escaped_bucket} {escaped_target} --exclude={} --exact-timestamps",
            self.exclude_pattern
        )
    }
}

/// Ordered shell steps making up one remote invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandPlan {
    steps: Vec<String>,
}

impl CommandPlan {
    /// Starts an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the standard pull for `bucket`: sync followed by the settle
    /// delay.
    #[must_use]
    pub fn pull(config: &PullConfig, bucket: &str) -> Self {
        Self::new()
            .step(
                SyncStep {
                    bucket: bucket.to_owned(),
                    target_dir: Utf8Path::new(config.target_dir.trim()).to_path_buf(),
                    exclude_pattern: config.exclude_pattern.clone(),
                }
                .render(),
            )
            .settle(config.settle_delay())
    }

    /// Appends a raw shell step.
    #[must_use]
    pub fn step(mut self, command: impl Into<String>) -> Self {
        self.steps.push(command.into());
        self
    }

    /// Appends a `sleep` for the given whole number of seconds.
    #[must_use]
    pub fn settle(self, delay: Duration) -> Self {
        self.step(format!("sleep {}", delay.as_secs()))
    }

    /// Returns the individual steps in order.
    #[must_use]
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Joins the steps into a single command line.
    #[must_use]
    pub fn compose(&self) -> String {
        self.steps.join(STATEMENT_SEPARATOR)
    }
}
