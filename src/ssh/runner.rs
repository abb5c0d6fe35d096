// ABOUTME: Remote command execution and exit-status classification.
// ABOUTME: Drains stdout/stderr off an exec channel, then checks the status against an acceptable set.

use super::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

/// One event read off an exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    /// The command was terminated by a signal and has no exit status.
    ExitSignal(String),
    /// The remote side will send no more data on either stream.
    Eof,
}

/// A running remote command, seen as a stream of events.
#[async_trait]
pub trait ExecChannel: Send {
    /// Next event, or `None` once the channel has closed.
    async fn next_event(&mut self) -> Option<ExecEvent>;

    /// Close the channel early. Failures are not reported.
    async fn close(&mut self);
}

/// Something that can start remote commands.
#[async_trait]
pub trait Transport: Send + Sync {
    type Channel: ExecChannel;

    /// Start `command` remotely, optionally on a pseudo-terminal.
    async fn open_exec(&self, command: &str, pty: bool) -> Result<Self::Channel>;
}

/// A command to run, with the exit statuses that count as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    command: String,
    pty: bool,
    acceptable: BTreeSet<u32>,
}

impl CommandRequest {
    /// New request with a PTY and only status 0 accepted.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            pty: true,
            acceptable: BTreeSet::from([0]),
        }
    }

    /// Whether to allocate a pseudo-terminal. With a PTY the remote side
    /// merges stderr into stdout.
    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    /// Replace the acceptable exit statuses. An empty set rejects everything.
    pub fn accept(mut self, statuses: impl IntoIterator<Item = u32>) -> Self {
        self.acceptable = statuses.into_iter().collect();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn uses_pty(&self) -> bool {
        self.pty
    }

    pub fn acceptable_statuses(&self) -> &BTreeSet<u32> {
        &self.acceptable
    }

    pub fn accepts(&self, exit_status: u32) -> bool {
        self.acceptable.contains(&exit_status)
    }
}

/// Output from a remote command whose status was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit status reported by the remote side.
    pub exit_status: u32,
    /// Standard output, lines joined with `\n`.
    pub stdout: String,
    /// Standard error, lines joined with `\n`.
    pub stderr: String,
}

/// How captured command output is written to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputLog {
    /// Only the classification line is logged.
    #[default]
    Silent,
    /// Log stdout at info and any stderr at error before classifying,
    /// even when the status ends up accepted.
    Immediate,
    /// Log stderr at warn for accepted statuses and at error otherwise.
    Classified,
}

/// Runs commands over a [`Transport`] and classifies their exit status.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    output_log: OutputLog,
    timeout: Option<Duration>,
}

struct Drained {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit: Option<Exit>,
}

/// How the remote command ended.
enum Exit {
    Status(u32),
    Signal(String),
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_log(mut self, policy: OutputLog) -> Self {
        self.output_log = policy;
        self
    }

    /// Deadline for draining a command's output and status.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn logs_output(&self) -> bool {
        self.output_log != OutputLog::Silent
    }

    /// Run a command and classify its exit status.
    ///
    /// Returns the result when the status is in the request's acceptable set,
    /// and [`Error::CommandRejected`] with the same captured output otherwise.
    /// Failures of the channel itself surface as transport-class errors.
    pub async fn run<T: Transport>(
        &self,
        transport: &T,
        request: &CommandRequest,
    ) -> Result<CommandResult> {
        if self.logs_output() {
            tracing::debug!("Executing command: [{}]", request.command());
        }

        let mut channel = transport
            .open_exec(request.command(), request.uses_pty())
            .await?;

        let drained = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, drain(&mut channel)).await {
                Ok(drained) => drained,
                Err(_) => {
                    channel.close().await;
                    return Err(Error::CommandTimeout(limit));
                }
            },
            None => drain(&mut channel).await,
        };

        let stdout = join_lines(&drained.stdout);
        let stderr = join_lines(&drained.stderr);

        if self.output_log == OutputLog::Immediate {
            if !stdout.is_empty() {
                tracing::info!("{}", stdout);
            }
            if !stderr.is_empty() {
                tracing::error!("{}", stderr);
            }
        }

        // A dropped connection or channel leaves neither a status nor a signal.
        let exit = drained.exit.ok_or(Error::ChannelClosed)?;
        let accepted = match &exit {
            Exit::Status(status) => request.accepts(*status),
            Exit::Signal(_) => false,
        };

        if self.output_log == OutputLog::Classified {
            if !stdout.is_empty() {
                tracing::info!("{}", stdout);
            }
            if !stderr.is_empty() {
                if accepted {
                    tracing::warn!("{}", stderr);
                } else {
                    tracing::error!("{}", stderr);
                }
            }
        }

        let exit_status = match exit {
            Exit::Status(status) if accepted => status,
            Exit::Status(exit_status) => {
                tracing::warn!(exit_status, command = request.command(), "unacceptable exit status");
                return Err(Error::CommandRejected {
                    command: request.command().to_string(),
                    exit_status,
                    stdout,
                    stderr,
                });
            }
            Exit::Signal(signal) => {
                tracing::warn!(%signal, command = request.command(), "command killed by signal");
                return Err(Error::CommandKilled {
                    command: request.command().to_string(),
                    signal,
                    stdout,
                    stderr,
                });
            }
        };

        tracing::info!(exit_status, "accepted exit status");
        Ok(CommandResult {
            exit_status,
            stdout,
            stderr,
        })
    }
}

/// Read every event until the channel is done with both streams.
///
/// Stdout and stderr share the channel, so one loop drains both and neither
/// can back up behind the other. The exit status (or terminating signal) may
/// arrive before or after EOF; it is only taken as final once EOF has been
/// seen or the channel has closed.
async fn drain<C: ExecChannel + ?Sized>(channel: &mut C) -> Drained {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit = None;
    let mut got_eof = false;

    while let Some(event) = channel.next_event().await {
        match event {
            ExecEvent::Stdout(data) => stdout.extend_from_slice(&data),
            ExecEvent::Stderr(data) => stderr.extend_from_slice(&data),
            ExecEvent::ExitStatus(status) => {
                exit = Some(Exit::Status(status));
                if got_eof {
                    break;
                }
            }
            ExecEvent::ExitSignal(signal) => {
                exit = Some(Exit::Signal(signal));
                if got_eof {
                    break;
                }
            }
            ExecEvent::Eof => {
                got_eof = true;
                if exit.is_some() {
                    break;
                }
            }
        }
    }

    Drained {
        stdout,
        stderr,
        exit,
    }
}

/// Split raw stream bytes into lines and join them with a single `\n`.
/// PTY output uses `\r\n`, which is folded the same way.
pub(crate) fn join_lines(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .lines()
        .collect::<Vec<_>>()
        .join("\n")
}
