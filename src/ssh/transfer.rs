// ABOUTME: File push over the SFTP subsystem of an established session.
// ABOUTME: Single-shot upload: no retry, resume or checksum.

use super::client::Session;
use super::error::{Error, Result};
use super::runner::CommandRunner;
use russh_sftp::client::SftpSession;
use std::path::Path;
use tokio::io::AsyncWriteExt;

impl CommandRunner {
    /// Push a local file to the session's host.
    pub async fn copy_file(
        &self,
        session: &Session,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        if self.logs_output() {
            tracing::info!(
                "Copy {} -> {}:{}",
                local_path.display(),
                session.host(),
                remote_path
            );
        }
        let bytes = session.push_file(local_path, remote_path).await?;
        tracing::debug!(bytes, remote_path, "file pushed");
        Ok(())
    }
}

impl Session {
    /// Copy a local file to `remote_path`, returning the number of bytes sent.
    pub async fn push_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let failed = |reason: String| Error::Transfer {
            path: remote_path.to_string(),
            reason,
        };

        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|e| failed(format!("cannot read {}: {}", local_path.display(), e)))?;

        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| failed(format!("failed to open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| failed(format!("failed to request SFTP subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| failed(format!("failed to start SFTP session: {}", e)))?;

        let mut remote_file = sftp
            .create(remote_path)
            .await
            .map_err(|e| failed(format!("failed to create remote file: {}", e)))?;
        remote_file
            .write_all(&contents)
            .await
            .map_err(|e| failed(format!("failed to write remote file: {}", e)))?;
        remote_file
            .shutdown()
            .await
            .map_err(|e| failed(format!("failed to close remote file: {}", e)))?;

        if let Err(e) = sftp.close().await {
            tracing::debug!(error = %e, "SFTP session did not close cleanly");
        }

        Ok(contents.len() as u64)
    }
}
