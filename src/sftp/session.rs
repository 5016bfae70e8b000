//! SFTP session for file operations

use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::client::fs::{File, Metadata};
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::SftpError;

use super::types::{self, FileEntry};

/// SFTP session wrapper for file operations.
///
/// The underlying channel sits behind a mutex that is held for single
/// requests only; open file handles work without it, so many transfers can
/// stream over one channel at once.
pub struct SftpSession {
    sftp: Mutex<RusshSftpSession>,
    home_dir: String,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("home_dir", &self.home_dir)
            .finish_non_exhaustive()
    }
}

impl SftpSession {
    pub fn new(sftp: RusshSftpSession, home_dir: String) -> Self {
        Self {
            sftp: Mutex::new(sftp),
            home_dir,
        }
    }

    /// Get the remote home directory
    pub fn home_dir(&self) -> &str {
        &self.home_dir
    }

    /// Attributes of `path` itself, not following symlinks
    pub async fn lstat(&self, path: &str) -> Result<Metadata, SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.symlink_metadata(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Attributes of `path`, following symlinks
    pub async fn stat(&self, path: &str) -> Result<Metadata, SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.metadata(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Whether anything (file, directory, symlink) exists at `path`
    pub async fn exists(&self, path: &str) -> Result<bool, SftpError> {
        match self.lstat(path).await {
            Ok(_) => Ok(true),
            Err(SftpError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Resolve `path` to an absolute path on the server
    pub async fn canonicalize(&self, path: &str) -> Result<String, SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.canonicalize(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// List directory contents, without `.` and `..`
    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        let listing = {
            let sftp = self.sftp.lock().await;
            sftp.read_dir(path).await
        };

        let read_dir = match listing {
            Ok(read_dir) => read_dir,
            Err(e) => return Err(self.classify_list_error(path, e).await),
        };

        let entries = read_dir
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| FileEntry::from_attrs(path, &entry.file_name(), &entry.metadata()))
            .collect();

        Ok(entries)
    }

    /// Servers report listing a regular file in different ways; look at the
    /// path itself to give a precise error.
    async fn classify_list_error(
        &self,
        path: &str,
        err: russh_sftp::client::error::Error,
    ) -> SftpError {
        let err = SftpError::from_remote(path, err);
        if err.is_session_fatal() {
            return err;
        }
        match self.stat(path).await {
            Ok(attrs) if !attrs.is_dir() => SftpError::NotADirectory(path.to_string()),
            Err(SftpError::NotFound(_)) => SftpError::NotFound(path.to_string()),
            _ => err,
        }
    }

    /// Create a directory; an existing directory is not an error
    pub async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        match self.stat(path).await {
            Ok(attrs) if attrs.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(SftpError::InvalidOperation(format!(
                    "{} exists and is not a directory",
                    path
                )));
            }
            Err(SftpError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let sftp = self.sftp.lock().await;
        sftp.create_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Rename a file or directory
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.rename(old_path, new_path)
            .await
            .map_err(|e| SftpError::from_remote(old_path, e))
    }

    /// Set file/directory permissions (chmod)
    pub async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        let sftp = self.sftp.lock().await;

        let attrs = FileAttributes {
            permissions: Some(mode & 0o7777),
            ..Default::default()
        };

        sftp.set_metadata(path, attrs)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Remove a file or symlink
    pub async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.remove_file(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Remove a directory (must be empty)
    pub async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.remove_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Remove a file or directory tree, depth first. Symlinks are removed,
    /// never followed. Stops at the first failure.
    pub async fn remove_recursive(&self, path: &str) -> Result<(), SftpError> {
        let attrs = self.lstat(path).await?;

        if attrs.is_symlink() || !attrs.is_dir() {
            return self.remove_file(path).await;
        }

        for entry in self.list_dir(path).await? {
            Box::pin(self.remove_recursive(&entry.path)).await?;
        }
        self.remove_dir(path).await
    }

    /// Open a remote file for reading
    pub async fn open_read(&self, path: &str) -> Result<File, SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.open(path)
            .await
            .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Open a remote file for writing, creating or truncating it
    pub async fn open_write(&self, path: &str) -> Result<File, SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.open_with_flags(
            path,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        )
        .await
        .map_err(|e| SftpError::from_remote(path, e))
    }

    /// Copy a file, symlink or directory tree from `src` to `dst`.
    ///
    /// File contents stream through the client in `chunk_size` pieces.
    /// Stops at the first failure; whatever was copied so far stays.
    pub async fn copy_recursive(
        &self,
        src: &str,
        dst: &str,
        chunk_size: usize,
    ) -> Result<(), SftpError> {
        let attrs = self.lstat(src).await?;

        if attrs.is_symlink() {
            let target = {
                let sftp = self.sftp.lock().await;
                sftp.read_link(src)
                    .await
                    .map_err(|e| SftpError::from_remote(src, e))?
            };
            let sftp = self.sftp.lock().await;
            return sftp
                .symlink(dst, target)
                .await
                .map_err(|e| SftpError::from_remote(dst, e));
        }

        if attrs.is_dir() {
            self.create_dir(dst).await?;
            for entry in self.list_dir(src).await? {
                let child_dst = types::join_remote(dst, &entry.name);
                Box::pin(self.copy_recursive(&entry.path, &child_dst, chunk_size)).await?;
            }
        } else {
            self.copy_file(src, dst, chunk_size).await?;
        }

        if let Some(mode) = attrs.permissions {
            self.set_permissions(dst, mode).await?;
        }
        Ok(())
    }

    async fn copy_file(&self, src: &str, dst: &str, chunk_size: usize) -> Result<u64, SftpError> {
        let mut reader = self.open_read(src).await?;
        let mut writer = self.open_write(dst).await?;

        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| SftpError::Remote {
                path: src.to_string(),
                reason: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| SftpError::Remote {
                    path: dst.to_string(),
                    reason: e.to_string(),
                })?;
            copied += n as u64;
        }

        writer.shutdown().await.map_err(|e| SftpError::Remote {
            path: dst.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Copied {} bytes from {} to {}", copied, src, dst);
        Ok(copied)
    }

    /// Close the SFTP channel
    pub async fn close(&self) -> Result<(), SftpError> {
        let sftp = self.sftp.lock().await;
        sftp.close()
            .await
            .map_err(|e| SftpError::from_remote("/", e))
    }
}
