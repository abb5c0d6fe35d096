// ABOUTME: SSH-specific error types.
// ABOUTME: Separates connection, transport, rejected-command and transfer failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection to {host}:{port} failed: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("authentication failed for {user}: {reason}")]
    AuthenticationFailed { user: String, reason: String },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error(
        "command `{command}` exited with status {exit_status}\nstdout: {stdout}\nstderr: {stderr}"
    )]
    CommandRejected {
        command: String,
        exit_status: u32,
        stdout: String,
        stderr: String,
    },

    #[error(
        "command `{command}` was killed by signal {signal}\nstdout: {stdout}\nstderr: {stderr}"
    )]
    CommandKilled {
        command: String,
        signal: String,
        stdout: String,
        stderr: String,
    },

    #[error("transfer to {path} failed: {reason}")]
    Transfer { path: String, reason: String },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure class, for callers that only care about where things broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session could not be established.
    Connection,
    /// The session broke while a command was in flight.
    Transport,
    /// The command finished with an unacceptable status, or was killed by a signal.
    Command,
    /// A file push failed.
    Transfer,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthenticationFailed { .. }
            | Error::AgentUnavailable(_)
            | Error::KeyLoadFailed { .. }
            | Error::Key(_) => ErrorKind::Connection,
            Error::Transport(_)
            | Error::ChannelClosed
            | Error::CommandTimeout(_)
            | Error::Protocol(_)
            | Error::Io(_) => ErrorKind::Transport,
            Error::CommandRejected { .. } | Error::CommandKilled { .. } => ErrorKind::Command,
            Error::Transfer { .. } => ErrorKind::Transfer,
        }
    }

    /// Only transport failures are worth retrying; a rejected command will
    /// report the same status again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

pub type Result<T> = std::result::Result<T, Error>;
