use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationError;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
}

/// SSH-related errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Invalid server address: {0}")]
    InvalidServer(#[from] ValidationError),

    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Key file {0} is encrypted and needs a passphrase")]
    KeyFilePassphraseRequired(PathBuf),

    #[error("Wrong passphrase for key file {0}")]
    KeyFilePassphraseInvalid(PathBuf),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Timeout connecting to {0}")]
    Timeout(String),

    #[error("Host key verification failed: {0}")]
    HostKeyVerification(String),

    #[error("russh error: {0}")]
    Russh(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

impl SshError {
    /// Whether retrying the same credentials can possibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SshError::ConnectionFailed { .. }
                | SshError::Timeout(_)
                | SshError::Channel(_)
                | SshError::Russh(_)
        )
    }
}

/// SFTP-related errors
#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Not connected")]
    NotConnected,

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Remote operation on {path} failed: {reason}")]
    Remote { path: String, reason: String },

    #[error("SFTP session lost: {0}")]
    SessionLost(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Local I/O error: {0}")]
    LocalIo(String),

    #[error(transparent)]
    Connect(#[from] SshError),
}

impl SftpError {
    /// Map a russh-sftp failure on `path` onto a typed outcome
    pub(crate) fn from_remote(path: &str, err: russh_sftp::client::error::Error) -> Self {
        use russh_sftp::client::error::Error as RemoteError;
        use russh_sftp::protocol::StatusCode;

        match err {
            RemoteError::Status(status) => match status.status_code {
                StatusCode::NoSuchFile => SftpError::NotFound(path.to_string()),
                StatusCode::PermissionDenied => SftpError::PermissionDenied(path.to_string()),
                StatusCode::NoConnection | StatusCode::ConnectionLost => {
                    SftpError::SessionLost(status.error_message)
                }
                _ => SftpError::Remote {
                    path: path.to_string(),
                    reason: status.error_message,
                },
            },
            RemoteError::Timeout => SftpError::Timeout(path.to_string()),
            other => SftpError::Remote {
                path: path.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Whether the SFTP channel can no longer be used after this error
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, SftpError::SessionLost(_) | SftpError::SessionClosed)
    }
}
