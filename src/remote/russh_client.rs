//! `russh`-backed implementation of [`Connector`] and [`RemoteSession`].
//!
//! Each exec opens a fresh channel. A pump task forwards the channel's stdout
//! into an in-memory pipe read by the drain logic and reports the exit status
//! once the channel closes.

use std::sync::Arc;

use russh::client::{self, Msg};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::PullError;

use super::{
    Connector, ExitStatus, HostKeyPolicy, RemoteProcess, RemoteSession, SessionTarget, ShellFuture,
    Signer,
};

/// Buffer between the channel pump and the line reader.
const STDOUT_PIPE_CAPACITY: usize = 64 * 1024;

/// Extended-data stream number used for stderr.
const STDERR_STREAM: u32 = 1;

struct HostKeyCheck {
    policy: HostKeyPolicy,
    address: String,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = self.policy.accepts(server_public_key);
        if !accepted {
            warn!(
                address = %self.address,
                fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                "host key does not match the pinned fingerprint"
            );
        }
        Ok(accepted)
    }
}

/// Dials the control host with `russh`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RusshConnector;

impl Connector for RusshConnector {
    type Session = RusshSession;

    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
        signer: Signer,
    ) -> ShellFuture<'a, Self::Session> {
        Box::pin(async move {
            let address = target.address();
            match tokio::time::timeout(target.connect_timeout, open_session(target, signer)).await
            {
                Ok(result) => result,
                Err(_) => Err(PullError::Dial {
                    address,
                    message: format!(
                        "timed out after {}s",
                        target.connect_timeout.as_secs()
                    ),
                }),
            }
        })
    }
}

async fn open_session(target: &SessionTarget, signer: Signer) -> Result<RusshSession, PullError> {
    let address = target.address();
    let stream = TcpStream::connect(address.as_str())
        .await
        .map_err(|err| PullError::Dial {
            address: address.clone(),
            message: err.to_string(),
        })?;

    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        ..Default::default()
    });
    let handler = HostKeyCheck {
        policy: target.host_key_policy.clone(),
        address: address.clone(),
    };
    let mut handle = client::connect_stream(config, stream, handler)
        .await
        .map_err(|err| PullError::Session(format!("handshake with {address} failed: {err}")))?;

    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|err| PullError::Session(err.to_string()))?
        .flatten();
    let auth = handle
        .authenticate_publickey(
            target.username.clone(),
            PrivateKeyWithHashAlg::new(signer.key(), hash_alg),
        )
        .await
        .map_err(|err| PullError::Session(format!("authentication failed: {err}")))?;
    if !auth.success() {
        return Err(PullError::Session(format!(
            "{} key rejected for user {}",
            signer.algorithm(),
            target.username
        )));
    }

    info!(address = %address, user = %target.username, "SSH session established");
    Ok(RusshSession { handle, address })
}

/// An authenticated `russh` connection.
pub struct RusshSession {
    handle: client::Handle<HostKeyCheck>,
    address: String,
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RemoteSession for RusshSession {
    fn exec<'a>(&'a mut self, command: &'a str) -> ShellFuture<'a, RemoteProcess> {
        Box::pin(async move {
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(|err| PullError::Session(format!("failed to open channel: {err}")))?;
            channel
                .exec(true, command)
                .await
                .map_err(|err| PullError::Run(format!("exec request failed: {err}")))?;

            let early = await_exec_reply(&mut channel).await?;

            let (reader, writer) = tokio::io::duplex(STDOUT_PIPE_CAPACITY);
            let (exit_tx, exit_rx) = oneshot::channel();
            tokio::spawn(async move {
                let mut pump = ChannelPump::new(writer);
                let mut open = pump.replay(early).await;
                while open {
                    match channel.wait().await {
                        Some(msg) => open = pump.apply(msg).await,
                        None => open = false,
                    }
                }
                pump.finish(exit_tx);
            });

            Ok(RemoteProcess {
                stdout: Box::new(reader),
                exit: exit_rx,
            })
        })
    }

    fn close(&mut self) -> ShellFuture<'_, ()> {
        Box::pin(async move {
            self.handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(|err| PullError::Session(format!("disconnect failed: {err}")))?;
            debug!(address = %self.address, "SSH session closed");
            Ok(())
        })
    }
}

/// Outcome of one message received while waiting for the exec reply.
#[derive(Debug)]
enum ExecReply {
    /// The remote side accepted the request.
    Started,
    /// A message that arrived before the reply; kept for the pump.
    Early(ChannelMsg),
}

fn classify_exec_reply(msg: Option<ChannelMsg>) -> Result<ExecReply, PullError> {
    match msg {
        Some(ChannelMsg::Success) => Ok(ExecReply::Started),
        Some(ChannelMsg::Failure) => Err(PullError::Run(String::from(
            "remote side refused to run the command",
        ))),
        Some(other) => Ok(ExecReply::Early(other)),
        None => Err(PullError::Run(String::from(
            "channel closed before the command started",
        ))),
    }
}

/// Waits for the reply to the exec request, keeping any messages that
/// arrive before it so the pump can replay them.
async fn await_exec_reply(channel: &mut Channel<Msg>) -> Result<Vec<ChannelMsg>, PullError> {
    let mut early = Vec::new();
    loop {
        match classify_exec_reply(channel.wait().await)? {
            ExecReply::Started => return Ok(early),
            ExecReply::Early(msg) => early.push(msg),
        }
    }
}

/// Routes channel messages to the stdout pipe and records the exit status.
struct ChannelPump {
    stdout: Option<DuplexStream>,
    status: Option<ExitStatus>,
}

impl ChannelPump {
    const fn new(stdout: DuplexStream) -> Self {
        Self {
            stdout: Some(stdout),
            status: None,
        }
    }

    /// Applies one message; returns `false` once the channel has closed.
    async fn apply(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => {
                if let Some(pipe) = self.stdout.as_mut()
                    && pipe.write_all(&data).await.is_err()
                {
                    debug!("stdout reader gone; discarding further output");
                    self.stdout = None;
                }
            }
            ChannelMsg::ExtendedData { data, ext } if ext == STDERR_STREAM => {
                debug!(stderr = %String::from_utf8_lossy(&data), "remote stderr");
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.status = Some(ExitStatus::Code(exit_status));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                self.status = Some(ExitStatus::Signal(format!("{signal_name:?}")));
            }
            // The exit status may still follow EOF, so only stdout ends here.
            ChannelMsg::Eof => self.stdout = None,
            ChannelMsg::Close => return false,
            _ => {}
        }
        true
    }

    /// Applies messages received before the exec reply, in order. Returns
    /// `false` when one of them closed the channel.
    async fn replay(&mut self, early: Vec<ChannelMsg>) -> bool {
        let mut open = true;
        for msg in early {
            open = self.apply(msg).await && open;
        }
        open
    }

    fn finish(self, exit_tx: oneshot::Sender<ExitStatus>) {
        drop(self.stdout);
        match self.status {
            Some(status) => {
                exit_tx.send(status).ok();
            }
            None => warn!("channel closed without an exit status"),
        }
    }
}
