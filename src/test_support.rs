//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, oneshot};

use crate::config::PullConfig;
use crate::error::PullError;
use crate::remote::{
    Connector, ExitStatus, RemoteProcess, RemoteSession, SessionTarget, ShellFuture, Signer,
};
use crate::storage::{ObjectStore, StoreFuture};

/// Unencrypted ed25519 key used wherever a parseable credential is needed.
pub const TEST_PRIVATE_KEY: &str = include_str!("../tests/fixtures/test_ed25519");

/// Fingerprint pinned by [`sample_config`].
pub const TEST_HOST_FINGERPRINT: &str = "SHA256:uNiVztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s";

/// Returns a valid configuration with the default pull settings.
#[must_use]
pub fn sample_config() -> PullConfig {
    PullConfig {
        control_host: String::from("10.0.0.5"),
        key_object: String::from("deploy.pem"),
        username: String::from("ubuntu"),
        region: String::from("us-east-1"),
        ssh_port: 22,
        connect_timeout_secs: 15,
        accept_any_host_key: false,
        host_key_fingerprint: Some(String::from(TEST_HOST_FINGERPRINT)),
        target_dir: String::from("/tmp"),
        exclude_pattern: String::from("*.pem"),
        credential_suffix: String::from(".pem"),
        settle_secs: 5,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Call recorded by [`FakeObjectStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreCall {
    /// A download of `bucket/key`.
    Download {
        /// Bucket addressed.
        bucket: String,
        /// Key addressed.
        key: String,
    },
    /// A fetch of `bucket/key`.
    Fetch {
        /// Bucket addressed.
        bucket: String,
        /// Key addressed.
        key: String,
    },
}

/// In-memory object store that records every call.
#[derive(Clone, Debug, Default)]
pub struct FakeObjectStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
}

impl FakeObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `contents` under `bucket/key`.
    pub fn insert(&self, bucket: &str, key: &str, contents: impl Into<Vec<u8>>) {
        lock(&self.objects).insert((bucket.to_owned(), key.to_owned()), contents.into());
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    fn lookup(&self, operation: &'static str, bucket: &str, key: &str) -> Result<Vec<u8>, PullError> {
        lock(&self.objects)
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| PullError::Transfer {
                operation,
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                message: String::from("NoSuchKey"),
            })
    }
}

impl ObjectStore for FakeObjectStore {
    fn download<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        destination: &'a Utf8Path,
    ) -> StoreFuture<'a, ()> {
        lock(&self.calls).push(StoreCall::Download {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        let found = self.lookup("download", bucket, key);
        Box::pin(async move {
            let contents = found?;
            tokio::fs::write(destination, contents)
                .await
                .map_err(|err| PullError::Transfer {
                    operation: "download",
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    message: err.to_string(),
                })
        })
    }

    fn fetch<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<i64>> {
        lock(&self.calls).push(StoreCall::Fetch {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        let found = self
            .lookup("fetch", bucket, key)
            .map(|contents| i64::try_from(contents.len()).ok());
        Box::pin(async move { found })
    }
}

/// Outcome scripted for one connection made through [`FakeConnector`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptedRun {
    /// The command prints `stdout` and finishes with `exit` (or without an
    /// exit status when `None`).
    Output {
        /// Bytes written to standard output.
        stdout: String,
        /// Exit status reported after the output.
        exit: Option<ExitStatus>,
    },
    /// Dialling the host fails.
    DialFailure,
    /// Authentication fails.
    AuthFailure,
    /// The exec request is refused.
    ExecFailure,
}

impl ScriptedRun {
    /// A command that prints `stdout` and exits with `code`.
    #[must_use]
    pub fn exits(code: u32, stdout: impl Into<String>) -> Self {
        Self::Output {
            stdout: stdout.into(),
            exit: Some(ExitStatus::Code(code)),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    runs: VecDeque<ScriptedRun>,
    connects: Vec<SessionTarget>,
    commands: Vec<String>,
    closes: usize,
    open: usize,
    max_open: usize,
}

/// Scripted connector returning pre-seeded outcomes in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    /// Creates a connector with no queued outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next connection.
    pub fn push(&self, run: ScriptedRun) {
        lock(&self.state).runs.push_back(run);
    }

    /// Number of connection attempts, including failed ones.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects.len()
    }

    /// Targets passed to each connection attempt.
    #[must_use]
    pub fn targets(&self) -> Vec<SessionTarget> {
        lock(&self.state).connects.clone()
    }

    /// Commands executed, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    /// Highest number of sessions open at the same time.
    #[must_use]
    pub fn max_open_sessions(&self) -> usize {
        lock(&self.state).max_open
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
        signer: Signer,
    ) -> ShellFuture<'a, Self::Session> {
        drop(signer);
        let mut state = lock(&self.state);
        state.connects.push(target.clone());
        let run = state.runs.pop_front();
        let result = match run {
            Some(ScriptedRun::DialFailure) => Err(PullError::Dial {
                address: target.address(),
                message: String::from("connection refused"),
            }),
            Some(ScriptedRun::AuthFailure) => Err(PullError::Session(String::from(
                "ssh-ed25519 key rejected",
            ))),
            None => Err(PullError::Dial {
                address: target.address(),
                message: String::from("no scripted outcome available"),
            }),
            Some(other) => {
                state.open += 1;
                state.max_open = state.max_open.max(state.open);
                Ok(FakeSession {
                    state: Arc::clone(&self.state),
                    run: Some(other),
                })
            }
        };
        drop(state);
        Box::pin(async move { result })
    }
}

/// Session handed out by [`FakeConnector`].
#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<ConnectorState>>,
    run: Option<ScriptedRun>,
}

impl RemoteSession for FakeSession {
    fn exec<'a>(&'a mut self, command: &'a str) -> ShellFuture<'a, RemoteProcess> {
        lock(&self.state).commands.push(command.to_owned());
        let result = match self.run.take() {
            Some(ScriptedRun::Output { stdout, exit }) => {
                let (exit_tx, exit_rx) = oneshot::channel();
                if let Some(status) = exit {
                    exit_tx.send(status).ok();
                }
                Ok(RemoteProcess {
                    stdout: Box::new(Cursor::new(stdout.into_bytes())),
                    exit: exit_rx,
                })
            }
            _ => Err(PullError::Run(String::from("exec request failed"))),
        };
        Box::pin(async move { result })
    }

    fn close(&mut self) -> ShellFuture<'_, ()> {
        let mut state = lock(&self.state);
        state.closes += 1;
        state.open = state.open.saturating_sub(1);
        drop(state);
        Box::pin(async { Ok(()) })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
