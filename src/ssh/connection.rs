use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use russh::Disconnect;
use russh::client::Handle;

use crate::security_log;
use crate::sftp::SftpSession;
use crate::validation::Endpoint;

use super::handler::ClientHandler;

/// One established connection: the SSH transport and its SFTP channel.
///
/// Dropping the last reference disconnects in the background.
pub struct SshConnection {
    handle: Arc<Handle<ClientHandler>>,
    sftp: SftpSession,
    endpoint: Endpoint,
    user: String,
    disconnect_logged: AtomicBool,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("sftp", &self.sftp)
            .finish()
    }
}

impl SshConnection {
    pub fn new(
        handle: Handle<ClientHandler>,
        sftp: SftpSession,
        endpoint: Endpoint,
        user: String,
    ) -> Self {
        Self {
            handle: Arc::new(handle),
            sftp,
            endpoint,
            user,
            disconnect_logged: AtomicBool::new(false),
        }
    }

    pub fn sftp(&self) -> &SftpSession {
        &self.sftp
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the SSH transport has gone away
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    fn log_disconnect(&self, reason: &str) {
        if !self.disconnect_logged.swap(true, Ordering::SeqCst) {
            security_log::log_sftp_disconnect(
                &self.endpoint.host,
                self.endpoint.port,
                &self.user,
                reason,
            );
        }
    }

    /// Close the SFTP channel and the SSH connection
    pub async fn disconnect(&self, reason: &str) {
        self.log_disconnect(reason);
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self.sftp.close().await {
            tracing::debug!("Closing SFTP channel to {} failed: {}", self.endpoint, e);
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, reason, "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.endpoint, e);
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.log_disconnect("connection dropped");
        if self.handle.is_closed() {
            return;
        }
        let handle = self.handle.clone();
        let endpoint = self.endpoint.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    let _ = handle
                        .disconnect(Disconnect::ByApplication, "connection dropped", "en")
                        .await;
                    tracing::debug!("SSH connection cleanup: disconnected {}", endpoint);
                });
            }
            Err(_) => {
                tracing::debug!(
                    "SSH connection dropped without a Tokio runtime; disconnect skipped"
                );
            }
        }
    }
}
