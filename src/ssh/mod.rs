// ABOUTME: SSH client module: sessions, command execution and file push.
// ABOUTME: Classifies remote exit statuses against a caller-supplied acceptable set.

mod client;
mod error;
mod runner;
mod transfer;

pub use client::{DEFAULT_CONNECT_TIMEOUT, Session, SessionChannel, SessionConfig};
pub use error::{Error, ErrorKind, Result};
pub use runner::{
    CommandRequest, CommandResult, CommandRunner, ExecChannel, ExecEvent, OutputLog, Transport,
};

