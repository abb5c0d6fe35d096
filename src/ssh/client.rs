// ABOUTME: SSH session management using russh.
// ABOUTME: Handles connection, host key trust, authentication and teardown.

use super::error::{Error, Result};
use super::runner::{ExecChannel, ExecEvent, Transport};
use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect, Sig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default time allowed for connecting and authenticating. Probes should fail fast.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for establishing an SSH session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Password, tried first when set.
    pub password: Option<String>,
    /// In-memory private key (OpenSSH or PEM text).
    pub private_key: Option<String>,
    /// Path to a private key file.
    pub key_path: Option<PathBuf>,
    /// Also try the usual key files under ~/.ssh.
    pub look_for_keys: bool,
    /// Also try identities offered by a running SSH agent.
    pub allow_agent: bool,
    /// Accept and record unknown host keys (Trust On First Use).
    ///
    /// This trades security for convenience: the first key seen for a host
    /// is trusted without verification. Changed keys are still rejected.
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
    /// Bound on connect, handshake and authentication together.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            password: None,
            private_key: None,
            key_path: None,
            look_for_keys: false,
            allow_agent: false,
            trust_on_first_use: true,
            known_hosts_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn look_for_keys(mut self, look: bool) -> Self {
        self.look_for_keys = look;
        self
    }

    pub fn allow_agent(mut self, allow: bool) -> Self {
        self.allow_agent = allow;
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("look_for_keys", &self.look_for_keys)
            .field("allow_agent", &self.allow_agent)
            .field("trust_on_first_use", &self.trust_on_first_use)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// SSH client handler for russh.
pub(crate) struct SshHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl SshHandler {
    fn new(config: &SessionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            trust_on_first_use: config.trust_on_first_use,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }

    fn learn(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let known = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match known {
            Ok(true) => Ok(true),
            Err(russh::keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    host = %self.host,
                    port = self.port,
                    line,
                    "host key changed, refusing connection"
                );
                Ok(false)
            }
            // Unknown host, or an unreadable known_hosts file.
            Ok(false) | Err(_) => {
                if self.trust_on_first_use {
                    tracing::warn!(
                        "Trust-On-First-Use: accepting unknown host key for {}:{}",
                        self.host,
                        self.port
                    );
                    self.learn(server_public_key);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// An established, authenticated SSH session.
///
/// Only [`Session::connect`] produces one. Release it with [`Session::close`],
/// or use [`Session::scoped`] to have that done on every exit path.
pub struct Session {
    config: SessionConfig,
    handle: Option<Handle<SshHandler>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl Session {
    /// Connect to the remote host and authenticate.
    ///
    /// Everything up to a usable session must finish within
    /// `config.connect_timeout`, otherwise [`Error::ConnectTimeout`] is
    /// returned.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let limit = config.connect_timeout;
        let handle = match tokio::time::timeout(limit, Self::establish(&config)).await {
            Ok(handle) => handle?,
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    host: config.host.clone(),
                    port: config.port,
                    timeout: limit,
                });
            }
        };

        tracing::info!(host = %config.host, port = config.port, user = %config.user, "connected");
        Ok(Self {
            config,
            handle: Some(handle),
        })
    }

    /// Connect, hand the session to `f`, and close it whatever `f` returns.
    ///
    /// If the returned future is dropped mid-way the russh handle is dropped
    /// with it, which also tears the connection down.
    pub async fn scoped<T, E, F>(config: SessionConfig, f: F) -> std::result::Result<T, E>
    where
        F: AsyncFnOnce(&Session) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut session = Self::connect(config).await?;
        let result = f(&session).await;
        session.close().await;
        result
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Disconnect. Safe to call any number of times; never fails.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::warn!(host = %self.config.host, error = %e, "disconnect failed");
        }
    }

    pub(crate) fn handle(&self) -> Result<&Handle<SshHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Transport("session is closed".to_string()))
    }

    async fn establish(config: &SessionConfig) -> Result<Handle<SshHandler>> {
        let russh_config = Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let mut handle = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            SshHandler::new(config),
        )
        .await
        .map_err(|source| Error::Connection {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

        Self::authenticate(&mut handle, config).await?;
        Ok(handle)
    }

    /// Try every configured credential in turn until the server accepts one.
    async fn authenticate(handle: &mut Handle<SshHandler>, config: &SessionConfig) -> Result<()> {
        let mut tried = Vec::new();

        if let Some(password) = &config.password {
            tried.push("password".to_string());
            let result = handle
                .authenticate_password(&config.user, password)
                .await
                .map_err(Error::Protocol)?;
            if result.success() {
                return Ok(());
            }
        }

        for (label, key) in Self::configured_keys(config)? {
            if Self::try_key(handle, config, key).await? {
                return Ok(());
            }
            tracing::debug!(key = %label, "public key rejected");
            tried.push(label);
        }

        if config.allow_agent {
            tried.push("agent".to_string());
            match Self::authenticate_with_agent(handle, config).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "agent authentication unavailable"),
            }
        }

        if config.look_for_keys {
            for (label, key) in default_keys() {
                if Self::try_key(handle, config, key).await? {
                    return Ok(());
                }
                tracing::debug!(key = %label, "public key rejected");
                tried.push(label);
            }
        }

        let reason = if tried.is_empty() {
            "no credentials configured".to_string()
        } else {
            format!("rejected: {}", tried.join(", "))
        };
        Err(Error::AuthenticationFailed {
            user: config.user.clone(),
            reason,
        })
    }

    /// Explicitly configured keys: the in-memory key, then the key file.
    fn configured_keys(config: &SessionConfig) -> Result<Vec<(String, Arc<ssh_key::PrivateKey>)>> {
        let mut keys = Vec::new();

        if let Some(text) = &config.private_key {
            let key = decode_secret_key(text, None)?;
            keys.push(("in-memory key".to_string(), Arc::new(key)));
        }

        if let Some(key_path) = &config.key_path {
            let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoadFailed {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            keys.push((key_path.display().to_string(), Arc::new(key)));
        }

        Ok(keys)
    }

    async fn try_key(
        handle: &mut Handle<SshHandler>,
        config: &SessionConfig,
        key: Arc<ssh_key::PrivateKey>,
    ) -> Result<bool> {
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(Error::Protocol)?
            .flatten();
        let result = handle
            .authenticate_publickey(&config.user, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(Error::Protocol)?;
        Ok(result.success())
    }

    async fn authenticate_with_agent(
        handle: &mut Handle<SshHandler>,
        config: &SessionConfig,
    ) -> Result<bool> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| Error::AgentUnavailable(e.to_string()))?;

        let keys = agent
            .request_identities()
            .await
            .map_err(|e| Error::AgentUnavailable(format!("failed to list agent keys: {}", e)))?;

        for key in &keys {
            match handle
                .authenticate_publickey_with(&config.user, key.clone(), None, &mut agent)
                .await
            {
                Ok(result) if result.success() => return Ok(true),
                _ => continue,
            }
        }
        Ok(false)
    }
}

/// Unencrypted keys found at the usual `~/.ssh` locations.
fn default_keys() -> Vec<(String, Arc<ssh_key::PrivateKey>)> {
    let Ok(home) = std::env::var("HOME") else {
        return Vec::new();
    };
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .into_iter()
        .map(|name| PathBuf::from(&home).join(".ssh").join(name))
        .filter_map(|path| {
            let key = load_secret_key(&path, None).ok()?;
            Some((path.display().to_string(), Arc::new(key)))
        })
        .collect()
}

/// Signal name as sent on the wire, e.g. `KILL`.
fn signal_label(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

/// Exec channel backed by a russh session channel.
pub struct SessionChannel {
    inner: russh::Channel<client::Msg>,
}

#[async_trait]
impl ExecChannel for SessionChannel {
    async fn next_event(&mut self) -> Option<ExecEvent> {
        loop {
            match self.inner.wait().await? {
                ChannelMsg::Data { data } => return Some(ExecEvent::Stdout(data.to_vec())),
                // Extended data type 1 is stderr.
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    return Some(ExecEvent::Stderr(data.to_vec()));
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ExecEvent::ExitStatus(exit_status));
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Some(ExecEvent::ExitSignal(signal_label(&signal_name)));
                }
                ChannelMsg::Eof => return Some(ExecEvent::Eof),
                ChannelMsg::Close => return None,
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            tracing::debug!(error = %e, "failed to close channel");
        }
    }
}

#[async_trait]
impl Transport for Session {
    type Channel = SessionChannel;

    async fn open_exec(&self, command: &str, pty: bool) -> Result<SessionChannel> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| Error::Transport(format!("failed to open channel: {}", e)))?;

        if pty {
            channel
                .request_pty(true, "xterm", 80, 24, 0, 0, &[])
                .await
                .map_err(|e| Error::Transport(format!("failed to request pty: {}", e)))?;
        }

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::Transport(format!("failed to exec command: {}", e)))?;

        Ok(SessionChannel { inner: channel })
    }
}
