//! Concurrent draining of a remote command's standard output.
//!
//! A reader task decodes the stream into lines and hands each one over a
//! capacity-one channel, then fires a separate completion signal once the
//! stream ends. The coordinating loop prefers lines over the completion
//! signal, so completion is only observed after every line has been
//! received.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PullError;

use super::{RemoteProcess, RemoteSession};

/// Newline-terminated output collected from one command execution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OutputBuffer {
    text: String,
    lines: usize,
}

impl OutputBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `line` followed by a single newline.
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        self.lines += 1;
    }

    /// Returns the accumulated text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the number of lines appended so far.
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.lines
    }

    /// Returns `true` when no line has been appended.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Consumes the buffer, returning the accumulated text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Handles to a running line reader.
#[derive(Debug)]
pub struct LineReader {
    /// Decoded lines in stream order.
    pub lines: mpsc::Receiver<String>,
    /// Fires once the stream has ended and no further line will be sent.
    pub done: oneshot::Receiver<()>,
    /// The reader task itself.
    pub task: JoinHandle<()>,
}

/// Spawns a task that splits `stdout` into lines.
///
/// Lines are decoded lossily and stripped of their `\n` or `\r\n`
/// terminator. A read error ends the stream early and is logged.
pub fn spawn_line_reader<R>(stdout: R) -> LineReader
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (line_tx, line_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    if line_tx.send(decode_line(&raw)).await.is_err() {
                        debug!("output consumer dropped; stopping reader");
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "reading remote output failed; treating as end of stream");
                    break;
                }
            }
        }
        // Every line has been queued before completion is signalled.
        done_tx.send(()).ok();
    });

    LineReader {
        lines: line_rx,
        done: done_rx,
        task,
    }
}

fn decode_line(raw: &[u8]) -> String {
    let without_newline = raw.strip_suffix(b"\n").unwrap_or(raw);
    let content = without_newline
        .strip_suffix(b"\r")
        .unwrap_or(without_newline);
    String::from_utf8_lossy(content).into_owned()
}

/// Collects lines until the reader signals completion.
///
/// The loop ends when the done signal fires, when its sender is dropped, or
/// when the line channel closes. Lines queued before completion fired are
/// always collected, even when they were sent after the line channel was
/// last polled.
pub async fn drain_lines(
    mut lines: mpsc::Receiver<String>,
    mut done: oneshot::Receiver<()>,
) -> OutputBuffer {
    let mut buffer = OutputBuffer::new();
    loop {
        tokio::select! {
            biased;
            line = lines.recv() => match line {
                Some(text) => buffer.push_line(&text),
                None => break,
            },
            _ = &mut done => {
                // The reader may have queued its last line between the two polls.
                while let Ok(text) = lines.try_recv() {
                    buffer.push_line(&text);
                }
                break;
            }
        }
    }
    buffer
}

/// Runs `command` on `session` and drains its standard output.
///
/// # Errors
///
/// Returns whatever [`RemoteSession::exec`] fails with (nothing is drained in
/// that case), [`PullError::CommandNonZero`] carrying the full output when
/// the command exits unsuccessfully, and [`PullError::Run`] when the exit
/// status never arrives.
pub async fn execute<S>(session: &mut S, command: &str) -> Result<OutputBuffer, PullError>
where
    S: RemoteSession + ?Sized,
{
    let RemoteProcess { stdout, exit } = session.exec(command).await?;
    debug!("remote command dispatched");

    let reader = spawn_line_reader(stdout);
    let output = drain_lines(reader.lines, reader.done).await;
    if let Err(err) = reader.task.await {
        warn!(error = %err, "output reader task did not finish cleanly");
    }
    debug!(lines = output.line_count(), "remote output drained");

    match exit.await {
        Ok(status) if status.is_success() => Ok(output),
        Ok(status) => Err(PullError::CommandNonZero {
            status,
            output: output.into_string(),
        }),
        Err(_) => Err(PullError::Run(String::from(
            "channel closed before the exit status arrived",
        ))),
    }
}
