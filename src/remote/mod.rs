//! Remote execution over SSH: key parsing, session establishment, command
//! composition, and concurrent draining of the command's standard output.
//!
//! The transport sits behind the [`Connector`] and [`RemoteSession`] traits so
//! the drain logic can be exercised with in-memory streams. The production
//! implementation lives in [`russh_client`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;

use crate::error::PullError;

mod command;
mod drain;
mod host_key;
pub mod russh_client;

pub use command::{CommandPlan, SyncStep};
pub use drain::{LineReader, OutputBuffer, drain_lines, execute, spawn_line_reader};
pub use host_key::HostKeyPolicy;

/// Future returned by transport operations.
pub type ShellFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PullError>> + Send + 'a>>;

/// Authentication capability derived from a private key.
#[derive(Clone)]
pub struct Signer {
    key: Arc<PrivateKey>,
}

impl Signer {
    /// Parses OpenSSH or PEM private-key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::KeyParse`] when the bytes are empty, not UTF-8, or
    /// not a supported unencrypted private key.
    pub fn parse(bytes: &[u8]) -> Result<Self, PullError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(PullError::KeyParse(String::from(
                "credential material is empty",
            )));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|err| PullError::KeyParse(format!("credential is not text: {err}")))?;
        let key = russh::keys::decode_secret_key(text, None)
            .map_err(|err| PullError::KeyParse(err.to_string()))?;
        Ok(Self { key: Arc::new(key) })
    }

    /// Returns the shared private key.
    #[must_use]
    pub fn key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }

    /// Returns the key algorithm name, for logging.
    #[must_use]
    pub fn algorithm(&self) -> String {
        self.key.algorithm().as_str().to_owned()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

/// Connection parameters for the control host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Account to authenticate as.
    pub username: String,
    /// Bound on dialling and negotiating the session.
    pub connect_timeout: Duration,
    /// How the presented host key is checked.
    pub host_key_policy: HostKeyPolicy,
}

impl SessionTarget {
    /// Returns `host:port` for dialling and logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How a remote command finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    /// The command exited with the given code.
    Code(u32),
    /// The command was terminated by a signal.
    Signal(String),
}

impl ExitStatus {
    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exited with status {code}"),
            Self::Signal(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// A command running on the remote side.
///
/// `stdout` yields the command's standard output until end of stream.
/// `exit` resolves once the remote side reports how the command finished; a
/// dropped sender means the status was never received.
pub struct RemoteProcess {
    /// Standard output of the remote command.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Exit status, delivered when the channel closes.
    pub exit: oneshot::Receiver<ExitStatus>,
}

impl fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProcess").finish_non_exhaustive()
    }
}

/// An authenticated SSH connection.
pub trait RemoteSession: Send {
    /// Opens a channel and starts `command` on it. Resolves once the remote
    /// side accepted the request, not when the command completes.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Session`] when no channel can be opened and
    /// [`PullError::Run`] when the exec request fails.
    fn exec<'a>(&'a mut self, command: &'a str) -> ShellFuture<'a, RemoteProcess>;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Session`] when the disconnect cannot be sent.
    fn close(&mut self) -> ShellFuture<'_, ()>;
}

/// Dials the control host and authenticates.
pub trait Connector {
    /// Session type produced by this connector.
    type Session: RemoteSession;

    /// Opens a session to `target` authenticated with `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Dial`] when the host is unreachable within the
    /// timeout, and [`PullError::Session`] when negotiation or
    /// authentication fails.
    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
        signer: Signer,
    ) -> ShellFuture<'a, Self::Session>;
}

#[cfg(test)]
mod tests;
