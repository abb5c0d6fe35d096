// ABOUTME: In-memory transport that replays a fixed script of channel events.
// ABOUTME: Lets runner and flux tests run without an SSH server.

use async_trait::async_trait;
use checkflux::ssh::{ExecChannel, ExecEvent, Result, Transport};
use std::collections::VecDeque;
use std::sync::Mutex;

pub struct ScriptedChannel {
    events: VecDeque<ExecEvent>,
}

#[async_trait]
impl ExecChannel for ScriptedChannel {
    async fn next_event(&mut self) -> Option<ExecEvent> {
        self.events.pop_front()
    }

    async fn close(&mut self) {
        self.events.clear();
    }
}

/// Replays the same events for every command and records what was asked.
#[derive(Default)]
pub struct ScriptedTransport {
    events: Vec<ExecEvent>,
    commands: Mutex<Vec<(String, bool)>>,
}

impl ScriptedTransport {
    /// Script a command that prints `stdout` and `stderr` line by line and exits with `status`.
    pub fn lines(stdout: &[&str], stderr: &[&str], status: u32) -> Self {
        let mut events = Vec::new();
        for line in stdout {
            events.push(ExecEvent::Stdout(format!("{line}\n").into_bytes()));
        }
        for line in stderr {
            events.push(ExecEvent::Stderr(format!("{line}\n").into_bytes()));
        }
        events.push(ExecEvent::Eof);
        events.push(ExecEvent::ExitStatus(status));
        Self::events(events)
    }

    pub fn events(events: Vec<ExecEvent>) -> Self {
        Self {
            events,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Every `(command, pty)` pair opened so far.
    pub fn commands(&self) -> Vec<(String, bool)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Channel = ScriptedChannel;

    async fn open_exec(&self, command: &str, pty: bool) -> Result<ScriptedChannel> {
        self.commands.lock().unwrap().push((command.to_string(), pty));
        Ok(ScriptedChannel {
            events: self.events.iter().cloned().collect(),
        })
    }
}
