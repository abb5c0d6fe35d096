// ABOUTME: Entry point for the checkflux CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use checkflux::config::{self, Config, Defaults, EnvValue, Flow, ServerConfig};
use checkflux::error::{Error, Result};
use checkflux::flux::{FluxCheck, FluxReport, FluxVerdict, ProbeTool};
use checkflux::output::{Output, OutputMode};
use checkflux::ssh::{
    CommandRequest, CommandRunner, ErrorKind, OutputLog, Session, SessionConfig,
};
use clap::Parser;
use cli::{Cli, Commands, SshArgs};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code when the remote side answered "no": a closed flow, a rejected
/// command or a flow that did not match its expectation.
const EXIT_NEGATIVE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let output = Output::new(mode);

    let runner = CommandRunner::new().output_log(if cli.verbose {
        OutputLog::Immediate
    } else {
        OutputLog::Silent
    });

    match run(cli.command, &output, &runner).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_NEGATIVE),
        Err(e) => {
            output.error(&e.to_string());
            let code = match &e {
                Error::Ssh(ssh) if ssh.kind() == ErrorKind::Command => EXIT_NEGATIVE,
                Error::FlowMismatch { .. } => EXIT_NEGATIVE,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}

/// Returns `Ok(false)` when the command completed but the answer was negative.
async fn run(command: Commands, output: &Output, runner: &CommandRunner) -> Result<bool> {
    match command {
        Commands::Check {
            src,
            dst,
            port,
            ssh,
            tool,
        } => check(&src, &dst, port, tool, &ssh, output, runner).await,
        Commands::Exec {
            src,
            command,
            ssh,
            no_pty,
            accept,
            timeout,
        } => {
            let config = session_config(&src, &ssh)?;
            let request = CommandRequest::new(command).pty(!no_pty).accept(accept);
            let runner = match timeout {
                Some(limit) => runner.clone().timeout(limit),
                None => runner.clone(),
            };

            output.progress(&format!("→ Connecting to {}...", config.host));
            let result =
                Session::scoped(config, async |session| runner.run(session, &request).await)
                    .await?;
            output.command_result(&result);
            Ok(true)
        }
        Commands::Copy {
            src,
            local,
            remote,
            ssh,
        } => {
            let config = session_config(&src, &ssh)?;
            let host = config.host.clone();

            output.progress(&format!("→ Connecting to {}...", host));
            Session::scoped(config, async |session| {
                runner.copy_file(session, &local, &remote).await
            })
            .await?;
            output.success(&format!("Copied {} -> {}:{}", local.display(), host, remote));
            Ok(true)
        }
        Commands::Run { config } => {
            let config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::discover(&current_dir()?)?,
            };
            run_flows(&config, output, runner).await
        }
        Commands::Init { force } => {
            let path = config::init_config(&current_dir()?, force)?;
            output.success(&format!("Created {}", path.display()));
            Ok(true)
        }
    }
}

async fn check(
    src: &str,
    dst: &str,
    port: u16,
    tool: ProbeTool,
    ssh: &SshArgs,
    output: &Output,
    runner: &CommandRunner,
) -> Result<bool> {
    let check = FluxCheck::new(dst, port)?.tool(tool);
    let config = session_config(src, ssh)?;

    output.progress(&format!("→ Connecting to {}...", config.host));
    let verdict =
        Session::scoped(config, async |session| check.check(runner, session).await).await?;

    let open = verdict.is_open();
    output.report(&FluxReport::new(src, &check, verdict), open);
    Ok(open)
}

/// Check every configured flow, each over its own session.
///
/// A flow that cannot be checked counts as failed; the remaining flows are
/// still checked.
async fn run_flows(config: &Config, output: &Output, runner: &CommandRunner) -> Result<bool> {
    let total = config.flows.len();
    let mut failed = 0;

    for flow in config.flows.iter() {
        let label = format!("{} -> {}:{}", flow.src, flow.dst, flow.port);
        output.progress(&format!("→ {label}"));

        match check_flow(config, flow, runner).await {
            Ok((check, verdict)) => {
                let as_expected = flow.expect.matches(verdict.is_open());
                if !as_expected {
                    failed += 1;
                }
                output.report(&FluxReport::new(flow.src.to_string(), &check, verdict), as_expected);
            }
            Err(e) => {
                failed += 1;
                output.error(&format!("{label}: {e}"));
            }
        }
    }

    if failed > 0 {
        return Err(Error::FlowMismatch { failed, total });
    }
    output.success(&format!("{total} flow(s) as expected"));
    Ok(true)
}

async fn check_flow(
    config: &Config,
    flow: &Flow,
    runner: &CommandRunner,
) -> Result<(FluxCheck, FluxVerdict)> {
    let check = config.flux_check(flow)?;
    let session_config = config.defaults.session_config(&flow.src)?;
    let verdict =
        Session::scoped(session_config, async |session| check.check(runner, session).await)
            .await?;
    Ok((check, verdict))
}

/// Session settings for a single host given on the command line.
fn session_config(src: &str, ssh: &SshArgs) -> Result<SessionConfig> {
    let mut server = ServerConfig::parse(src).map_err(Error::InvalidSource)?;
    if let Some(user) = &ssh.user {
        server.user = Some(user.clone());
    }
    server.password = ssh.password_env.as_deref().map(EnvValue::from_env);
    server.key_path = ssh.key.clone();

    let defaults = Defaults {
        look_for_keys: ssh.look_for_keys,
        allow_agent: ssh.agent,
        trust_first_connection: !ssh.strict_host_keys,
        connect_timeout: ssh.connect_timeout,
        ..Defaults::default()
    };
    defaults.session_config(&server)
}

fn current_dir() -> Result<PathBuf> {
    Ok(env::current_dir()?)
}
