// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use checkflux::flux::ProbeTool;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "checkflux")]
#[command(about = "Check network flows from a remote source host over SSH")]
#[command(version)]
pub struct Cli {
    /// Log commands and their output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether SRC can open a TCP connection to DST:PORT
    Check {
        /// Source host, as [user@]host[:port]
        src: String,
        /// Destination host or IP
        dst: String,
        /// Destination TCP port
        port: u16,
        #[command(flatten)]
        ssh: SshArgs,
        /// Remote probe tool (nc or bash)
        #[arg(long, default_value = "nc")]
        tool: ProbeTool,
    },

    /// Run a command on SRC and classify its exit status
    Exec {
        /// Source host, as [user@]host[:port]
        src: String,
        /// Command line to run remotely
        command: String,
        #[command(flatten)]
        ssh: SshArgs,
        /// Do not allocate a pseudo-terminal
        #[arg(long)]
        no_pty: bool,
        /// Exit statuses treated as success
        #[arg(long, value_delimiter = ',', default_value = "0")]
        accept: Vec<u32>,
        /// Give up on the command after this long (e.g. 30s)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Copy a local file to SRC over SFTP
    Copy {
        /// Source host, as [user@]host[:port]
        src: String,
        /// Local file to send
        local: PathBuf,
        /// Destination path on the remote host
        remote: String,
        #[command(flatten)]
        ssh: SshArgs,
    },

    /// Check every flow listed in the configuration file
    Run {
        /// Configuration file (default: checkflux.yml in the current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a template checkflux.yml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Connection options shared by the single-host commands.
#[derive(Args, Clone)]
pub struct SshArgs {
    /// Login user (overrides the one in SRC)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Read the password from this environment variable
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Private key file
    #[arg(short = 'i', long)]
    pub key: Option<PathBuf>,

    /// Try identities from a running SSH agent
    #[arg(long)]
    pub agent: bool,

    /// Try the default key files under ~/.ssh
    #[arg(long)]
    pub look_for_keys: bool,

    /// Refuse hosts that are not already in known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,

    /// Connection timeout (e.g. 3s, 500ms)
    #[arg(long, default_value = "3s", value_parser = parse_duration)]
    pub connect_timeout: Duration,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}
