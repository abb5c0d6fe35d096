// ABOUTME: Configuration types and parsing for checkflux.yml.
// ABOUTME: Describes connection defaults and the flows to check from each source host.

mod env_value;
mod server;

pub use env_value::EnvValue;
pub use server::ServerConfig;

use crate::error::{Error, Result};
use crate::flux::{DEFAULT_PROBE_WAIT, FluxCheck, ProbeTool};
use crate::ssh::{DEFAULT_CONNECT_TIMEOUT, SessionConfig};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "checkflux.yml";
pub const CONFIG_FILENAME_ALT: &str = "checkflux.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".checkflux/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(deserialize_with = "deserialize_flows")]
    pub flows: NonEmpty<Flow>,
}

/// Connection and probe settings shared by every flow.
#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<EnvValue>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default)]
    pub look_for_keys: bool,

    #[serde(default)]
    pub allow_agent: bool,

    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default)]
    pub tool: ProbeTool,

    #[serde(default = "default_probe_wait", with = "humantime_serde")]
    pub wait: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            user: None,
            port: default_port(),
            password: None,
            key_path: None,
            look_for_keys: false,
            allow_agent: false,
            trust_first_connection: default_trust_first_connection(),
            known_hosts: None,
            connect_timeout: default_connect_timeout(),
            tool: ProbeTool::default(),
            wait: default_probe_wait(),
        }
    }
}

/// Whether a flow is supposed to be reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    #[default]
    Open,
    Closed,
}

impl Expectation {
    pub fn matches(self, open: bool) -> bool {
        match self {
            Expectation::Open => open,
            Expectation::Closed => !open,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Flow {
    #[serde(deserialize_with = "deserialize_server")]
    pub src: ServerConfig,

    pub dst: String,

    pub port: u16,

    #[serde(default)]
    pub expect: Expectation,

    #[serde(default)]
    pub tool: Option<ProbeTool>,
}

fn default_port() -> u16 {
    22
}

fn default_trust_first_connection() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_probe_wait() -> Duration {
    DEFAULT_PROBE_WAIT
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// The probe for one flow, with the flow's tool overriding the default.
    pub fn flux_check(&self, flow: &Flow) -> Result<FluxCheck> {
        Ok(FluxCheck::new(&flow.dst, flow.port)?
            .tool(flow.tool.unwrap_or(self.defaults.tool))
            .wait(self.defaults.wait))
    }
}

impl Defaults {
    /// Build session settings for `server`, filling gaps from these defaults.
    ///
    /// The user falls back to `$USER`, then `root`.
    pub fn session_config(&self, server: &ServerConfig) -> Result<SessionConfig> {
        let user = server
            .user
            .clone()
            .or_else(|| self.user.clone())
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));

        let mut config = SessionConfig::new(&server.host, user)
            .port(server.port.unwrap_or(self.port))
            .look_for_keys(self.look_for_keys)
            .allow_agent(self.allow_agent)
            .trust_on_first_use(self.trust_first_connection)
            .connect_timeout(self.connect_timeout);

        if let Some(password) = server.password.as_ref().or(self.password.as_ref()) {
            config = config.password(password.resolve()?);
        }
        if let Some(key_path) = server.key_path.as_ref().or(self.key_path.as_ref()) {
            config = config.key_path(key_path);
        }
        if let Some(known_hosts) = &self.known_hosts {
            config = config.known_hosts_path(known_hosts);
        }

        Ok(config)
    }
}

pub fn init_config(dir: &Path, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(config_path)
}

const TEMPLATE: &str = r#"defaults:
  user: ops
  password:
    env: CHECKFLUX_PASSWORD
  connect_timeout: 3s
  tool: netcat
flows:
  - src: ops@bastion.example.com:22
    dst: db.internal.example.com
    port: 5432
  - src: bastion.example.com
    dst: 10.0.0.1
    port: 23
    expect: closed
"#;

// Custom deserializers

fn deserialize_server<'de, D>(deserializer: D) -> std::result::Result<ServerConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ServerEntry::deserialize(deserializer)?
        .into_server_config()
        .map_err(serde::de::Error::custom)
}

fn deserialize_flows<'de, D>(deserializer: D) -> std::result::Result<NonEmpty<Flow>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let flows: Vec<Flow> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(flows).ok_or_else(|| serde::de::Error::custom("at least one flow is required"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    fn into_server_config(self) -> std::result::Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}
