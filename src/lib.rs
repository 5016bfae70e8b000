//! sshview: SFTP remote file browsing with cancellable transfers
//!
//! [`SshClient`] connects to one server with a password or a private key,
//! then lists, copies, moves and removes remote files and runs uploads and
//! downloads in the background with progress callbacks.

pub mod config;
pub mod error;
pub mod logging;
pub mod sftp;
pub mod ssh;
pub mod validation;

pub(crate) mod fs_utils;
pub(crate) mod security_log;

pub use config::{AppConfig, Bookmarks, ClientSettings, HostKeyPolicy};
pub use error::{ConfigError, SftpError, SshError};
pub use sftp::{FileEntry, SortOrder, TransferId, TransferInfo, TransferKind, format_size};
pub use ssh::{AuthMode, Credentials, ReconnectPolicy, SessionState, SshClient};
