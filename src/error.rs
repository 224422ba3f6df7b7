//! Error taxonomy for a pull cycle.
//!
//! Every failure carries an [`ErrorKind`] so the event iterator can decide
//! whether to keep going or abort the invocation without inspecting concrete
//! error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::ExitStatus;

/// Classification used by callers to pick a recovery policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Required configuration is missing or malformed; the invocation ends
    /// gracefully.
    Configuration,
    /// An object-storage call failed; logged and processing continues.
    Transfer,
    /// Key parsing, dialling or session negotiation failed; the invocation
    /// aborts.
    Fatal,
    /// The remote command ran to completion but reported failure.
    CommandNonZero,
    /// Any other failure while running the remote command; the record is
    /// abandoned without draining.
    RunOther,
}

/// Errors surfaced while processing a trigger record.
#[derive(Debug, Error)]
pub enum PullError {
    /// Raised when configuration cannot be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when an object-storage operation fails.
    #[error("{operation} s3://{bucket}/{key} failed: {message}")]
    Transfer {
        /// Operation that failed (for example `download`).
        operation: &'static str,
        /// Bucket addressed by the call.
        bucket: String,
        /// Object key addressed by the call.
        key: String,
        /// Underlying SDK or filesystem error.
        message: String,
    },
    /// Raised when credential material is absent or not a private key.
    #[error("parse key failed: {0}")]
    KeyParse(String),
    /// Raised when the control host cannot be reached in time.
    #[error("dial {address} failed: {message}")]
    Dial {
        /// Address that was dialled.
        address: String,
        /// Transport error description.
        message: String,
    },
    /// Raised when the SSH session cannot be negotiated or authenticated.
    #[error("session failed: {0}")]
    Session(String),
    /// Raised when the remote command exits unsuccessfully. The captured
    /// output is retained so it can still be logged.
    #[error("remote command {status}")]
    CommandNonZero {
        /// Exit status reported by the remote side.
        status: ExitStatus,
        /// Standard output collected before completion.
        output: String,
    },
    /// Raised for run failures other than a non-zero exit.
    #[error("run generated error: {0}")]
    Run(String),
}

impl PullError {
    /// Returns the recovery class for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::KeyParse(_) | Self::Dial { .. } | Self::Session(_) => ErrorKind::Fatal,
            Self::CommandNonZero { .. } => ErrorKind::CommandNonZero,
            Self::Run(_) => ErrorKind::RunOther,
        }
    }

    /// Returns `true` when the invocation must stop processing records.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}
