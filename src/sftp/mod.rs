//! SFTP session, remote file operations and transfers

pub mod client;
pub mod session;
pub mod transfer;
pub mod types;

pub use client::SftpConnector;
pub use session::SftpSession;
pub use transfer::{TransferId, TransferInfo, TransferKind, TransferRegistry};
pub use types::{FileEntry, SortOrder, format_size};
