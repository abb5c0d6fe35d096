// ABOUTME: Flux checks: ask a source host whether it can open a TCP connection to dst:port.
// ABOUTME: Builds the probe command and turns the classified result into an open/closed verdict.

use crate::error::Result;
use crate::ssh::{self, CommandRequest, CommandRunner, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Seconds the remote probe waits for the TCP handshake.
pub const DEFAULT_PROBE_WAIT: Duration = Duration::from_secs(3);

/// Shell statuses for "not executable" and "command not found".
const TOOL_FAILURE_STATUSES: [u32; 2] = [126, 127];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FluxError {
    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("invalid port: 0")]
    InvalidPort,

    #[error("probe tool {tool} could not run on the source host (exit {exit_status}): {detail}")]
    ProbeUnavailable {
        tool: ProbeTool,
        exit_status: u32,
        detail: String,
    },
}

/// Remote utility used to attempt the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTool {
    /// `nc -z`, available on most hosts.
    #[default]
    #[serde(alias = "nc")]
    Netcat,
    /// Bash's `/dev/tcp` pseudo-device, for hosts without netcat.
    #[serde(rename = "bash", alias = "bash-tcp")]
    BashTcp,
}

impl fmt::Display for ProbeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTool::Netcat => write!(f, "nc"),
            ProbeTool::BashTcp => write!(f, "bash"),
        }
    }
}

impl std::str::FromStr for ProbeTool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nc" | "netcat" => Ok(ProbeTool::Netcat),
            "bash" | "bash-tcp" => Ok(ProbeTool::BashTcp),
            other => Err(format!("unknown probe tool: {other} (expected nc or bash)")),
        }
    }
}

/// A TCP destination to probe from a source host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FluxCheck {
    dst: String,
    port: u16,
    tool: ProbeTool,
    wait: Duration,
}

/// Outcome of a flux check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FluxVerdict {
    Open,
    Closed { exit_status: u32, detail: String },
}

impl FluxVerdict {
    pub fn is_open(&self) -> bool {
        matches!(self, FluxVerdict::Open)
    }
}

impl fmt::Display for FluxVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluxVerdict::Open => write!(f, "open"),
            FluxVerdict::Closed { .. } => write!(f, "closed"),
        }
    }
}

impl FluxCheck {
    /// Validate a destination and port.
    ///
    /// The destination ends up in a remote shell command, so only hostname
    /// and IP literal characters are allowed.
    pub fn new(dst: impl Into<String>, port: u16) -> std::result::Result<Self, FluxError> {
        let dst = dst.into();
        let valid = !dst.is_empty()
            && !dst.starts_with('-')
            && dst
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
        if !valid {
            return Err(FluxError::InvalidDestination(dst));
        }
        if port == 0 {
            return Err(FluxError::InvalidPort);
        }
        Ok(Self {
            dst,
            port,
            tool: ProbeTool::default(),
            wait: DEFAULT_PROBE_WAIT,
        })
    }

    pub fn tool(mut self, tool: ProbeTool) -> Self {
        self.tool = tool;
        self
    }

    /// How long the remote side waits for the handshake. Rounded up to whole seconds.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn destination(&self) -> &str {
        &self.dst
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The shell command run on the source host.
    pub fn probe_command(&self) -> String {
        let secs = self.wait_secs();
        match self.tool {
            ProbeTool::Netcat => format!("nc -z -w {} {} {}", secs, self.dst, self.port),
            ProbeTool::BashTcp => format!(
                "timeout {} bash -c '</dev/tcp/{}/{}'",
                secs, self.dst, self.port
            ),
        }
    }

    fn wait_secs(&self) -> u64 {
        let secs = self.wait.as_secs() + u64::from(self.wait.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Run the probe over `transport`.
    ///
    /// A non-zero exit from the probe means the flow is closed. A probe tool
    /// that is missing or not executable, a killed probe and any SSH failure
    /// are errors, since none of them says anything about the flow.
    pub async fn check<T: Transport>(
        &self,
        runner: &CommandRunner,
        transport: &T,
    ) -> Result<FluxVerdict> {
        // No PTY: keeps stderr apart and stops nc from treating the session as interactive.
        let request = CommandRequest::new(self.probe_command()).pty(false);

        match runner.run(transport, &request).await {
            Ok(_) => Ok(FluxVerdict::Open),
            Err(ssh::Error::CommandRejected {
                exit_status,
                stdout,
                stderr,
                ..
            }) => {
                let detail = if stderr.is_empty() { stdout } else { stderr };
                if TOOL_FAILURE_STATUSES.contains(&exit_status) {
                    return Err(FluxError::ProbeUnavailable {
                        tool: self.tool,
                        exit_status,
                        detail,
                    }
                    .into());
                }
                Ok(FluxVerdict::Closed {
                    exit_status,
                    detail,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// One checked flow, ready for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct FluxReport {
    pub source: String,
    pub destination: String,
    pub port: u16,
    pub verdict: FluxVerdict,
    pub checked_at: DateTime<Utc>,
}

impl FluxReport {
    pub fn new(source: impl Into<String>, check: &FluxCheck, verdict: FluxVerdict) -> Self {
        Self {
            source: source.into(),
            destination: check.dst.clone(),
            port: check.port,
            verdict,
            checked_at: Utc::now(),
        }
    }
}

impl fmt::Display for FluxReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{} {}",
            self.source, self.destination, self.port, self.verdict
        )?;
        if let FluxVerdict::Closed {
            exit_status,
            detail,
        } = &self.verdict
        {
            write!(f, " (exit {exit_status})")?;
            if !detail.is_empty() {
                write!(f, ": {detail}")?;
            }
        }
        Ok(())
    }
}
