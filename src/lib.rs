//! Core library for the pullhook upload trigger.
//!
//! An object upload notification names a bucket. For every non-credential
//! object in the batch the crate downloads the bucket's private key, opens an
//! SSH session to a control host, and asks that host to synchronise the
//! bucket into its local filesystem, logging whatever the command prints.

pub mod config;
pub mod error;
pub mod pull;
pub mod remote;
pub mod storage;
pub mod test_support;
pub mod trigger;

pub use config::{ConfigError, PullConfig};
pub use error::{ErrorKind, PullError};
pub use pull::{BatchSummary, PullOrchestrator};
pub use remote::russh_client::RusshConnector;
pub use remote::{CommandPlan, HostKeyPolicy, OutputBuffer, SessionTarget, Signer};
pub use storage::{CredentialScratch, ObjectStore, S3ObjectStore};
pub use trigger::TriggerRecord;
