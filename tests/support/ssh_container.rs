// ABOUTME: Disposable OpenSSH server for integration tests.
// ABOUTME: Uses bollard to run one shared container with password login.

use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
};
use checkflux::ssh::SessionConfig;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

const IMAGE: &str = "lscr.io/linuxserver/openssh-server:latest";
/// Port sshd listens on inside the container.
pub const SSH_PORT: u16 = 2222;
const TEST_USER: &str = "prober";
const TEST_PASSWORD: &str = "checkflux-test";

static CONTAINER_ID: OnceLock<String> = OnceLock::new();

#[ctor::dtor]
fn remove_on_exit() {
    let Some(id) = CONTAINER_ID.get() else {
        return;
    };
    let Ok(rt) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    rt.block_on(async {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            let _ = docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
        }
    });
}

static SHARED: tokio::sync::OnceCell<SshContainer> = tokio::sync::OnceCell::const_new();

/// Get the shared SSH container, starting it if needed.
pub async fn shared_container() -> &'static SshContainer {
    SHARED
        .get_or_init(|| async {
            SshContainer::start()
                .await
                .expect("failed to start SSH container")
        })
        .await
}

pub struct SshContainer {
    port: u16,
}

impl SshContainer {
    async fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let docker = Docker::connect_with_local_defaults()?;

        let mut pull = docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(IMAGE.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress?;
        }

        let port = free_port().await?;
        let env = vec![
            "PUID=1000".to_string(),
            "PGID=1000".to_string(),
            "PASSWORD_ACCESS=true".to_string(),
            format!("USER_NAME={TEST_USER}"),
            format!("USER_PASSWORD={TEST_PASSWORD}"),
        ];
        let port_bindings = HashMap::from([(
            format!("{SSH_PORT}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        )]);

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(format!("checkflux-ssh-test-{}", std::process::id())),
                    ..Default::default()
                }),
                ContainerCreateBody {
                    image: Some(IMAGE.to_string()),
                    env: Some(env),
                    host_config: Some(HostConfig {
                        port_bindings: Some(port_bindings),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;
        let _ = CONTAINER_ID.set(container.id.clone());

        docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await?;

        wait_for_banner(port).await?;
        Ok(Self { port })
    }

    /// Session settings that log in as the test user.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new("127.0.0.1", TEST_USER)
            .port(self.port)
            .password(TEST_PASSWORD)
            .known_hosts_path(known_hosts_file())
            .connect_timeout(Duration::from_secs(10))
    }
}

/// A known_hosts file private to this test process.
fn known_hosts_file() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("checkflux-known-hosts-{}", std::process::id()))
}

async fn free_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr().map(|addr| addr.port())
}

async fn wait_for_banner(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::io::AsyncReadExt;

    let addr = format!("127.0.0.1:{port}");
    for _ in 0..60 {
        if let Ok(mut stream) = tokio::net::TcpStream::connect(&addr).await {
            let mut buf = [0u8; 32];
            if let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await
            {
                if n > 0 && buf[..n].starts_with(b"SSH-") {
                    // sshd answers before the user is fully provisioned.
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("SSH container did not become ready in time".into())
}
