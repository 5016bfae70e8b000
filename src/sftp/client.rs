//! Establishing SSH connections with an SFTP channel

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Config};
use russh_sftp::client::SftpSession as RusshSftpSession;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ClientSettings;
use crate::error::SshError;
use crate::security_log;
use crate::ssh::SshConnection;
use crate::ssh::auth::{AuthMode, ResolvedAuth};
use crate::ssh::handler::ClientHandler;
use crate::ssh::known_hosts::KnownHostsManager;
use crate::validation::Endpoint;

use super::session::SftpSession;

/// Opens TCP, runs the SSH handshake and authentication, and starts the
/// `sftp` subsystem.
pub struct SftpConnector {
    config: Arc<Config>,
    known_hosts: Arc<KnownHostsManager>,
    settings: ClientSettings,
}

impl SftpConnector {
    pub fn new(settings: ClientSettings, known_hosts: Arc<KnownHostsManager>) -> Self {
        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keepalive_interval: settings.keepalive_interval(),
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            known_hosts,
            settings,
        }
    }

    /// Connect to `endpoint` as `user` and establish an SFTP session
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        user: &str,
        auth: &AuthMode,
    ) -> Result<SshConnection, SshError> {
        let connection_timeout = self.settings.connection_timeout();
        let addr = (endpoint.host.as_str(), endpoint.port);

        let stream = timeout(connection_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SshError::Timeout(endpoint.to_string()))?
            .map_err(|e| SshError::ConnectionFailed {
                host: endpoint.host.clone(),
                port: endpoint.port,
                reason: e.to_string(),
            })?;

        // The handshake, authentication and subsystem setup share one deadline
        match timeout(
            connection_timeout,
            self.establish_sftp_session(endpoint, user, auth, stream),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(endpoint.to_string())),
        }
    }

    async fn establish_sftp_session(
        &self,
        endpoint: &Endpoint,
        user: &str,
        auth: &AuthMode,
        stream: TcpStream,
    ) -> Result<SshConnection, SshError> {
        let handler = ClientHandler::new(
            endpoint.host.clone(),
            endpoint.port,
            self.settings.host_key_policy,
            self.known_hosts.clone(),
        );

        let mut handle = client::connect_stream(self.config.clone(), stream, handler)
            .await
            .map_err(|e| match e {
                SshError::Russh(reason) => SshError::ConnectionFailed {
                    host: endpoint.host.clone(),
                    port: endpoint.port,
                    reason: format!("SSH handshake failed: {}", reason),
                },
                other => other,
            })?;

        let resolved = ResolvedAuth::resolve(auth).await?;
        authenticate(&mut handle, user, resolved, endpoint).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open channel: {}", e)))?;

        channel
            .request_subsystem(false, "sftp")
            .await
            .map_err(|e| SshError::Channel(format!("Failed to request SFTP subsystem: {}", e)))?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Channel(format!("Failed to initialize SFTP session: {}", e)))?;

        let home_dir = home_dir(&sftp).await;
        tracing::info!(
            "SFTP session established to {} (home {})",
            endpoint,
            home_dir
        );
        security_log::log_sftp_connect(&endpoint.host, endpoint.port, user);

        Ok(SshConnection::new(
            handle,
            SftpSession::new(sftp, home_dir),
            endpoint.clone(),
            user.to_string(),
        ))
    }
}

/// The login directory; `/` when the server will not say
async fn home_dir(sftp: &RusshSftpSession) -> String {
    match timeout(Duration::from_secs(5), sftp.canonicalize(".")).await {
        Ok(Ok(path)) => path,
        Ok(Err(_)) | Err(_) => "/".to_string(),
    }
}

async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    user: &str,
    auth: ResolvedAuth,
    endpoint: &Endpoint,
) -> Result<(), SshError> {
    let method_name = match &auth {
        ResolvedAuth::Password(_) => "password",
        ResolvedAuth::PublicKey(_) => "publickey",
    };

    security_log::log_auth_attempt(&endpoint.host, endpoint.port, user, method_name);

    let result = match auth {
        // expose_secret() only at the point of authentication
        ResolvedAuth::Password(password) => {
            handle
                .authenticate_password(user, password.expose_secret())
                .await
        }
        ResolvedAuth::PublicKey(key) => handle.authenticate_publickey(user, key).await,
    };

    let auth_result = match result {
        Ok(auth_result) => auth_result,
        Err(e) => {
            let reason = format!("{} auth failed: {}", method_name, e);
            security_log::log_auth_failure(&endpoint.host, endpoint.port, user, method_name, &reason);
            return Err(SshError::AuthenticationFailed(reason));
        }
    };

    if !auth_result.success() {
        let reason = "Authentication rejected by server";
        security_log::log_auth_failure(&endpoint.host, endpoint.port, user, method_name, reason);
        return Err(SshError::AuthenticationFailed(reason.to_string()));
    }

    security_log::log_auth_success(&endpoint.host, endpoint.port, user, method_name);
    Ok(())
}
