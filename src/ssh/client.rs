use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::config::ClientSettings;
use crate::error::{SftpError, SshError};
use crate::fs_utils;
use crate::sftp::{SftpConnector, SftpSession};
use crate::sftp::transfer::{
    self, TransferId, TransferInfo, TransferKind, TransferRegistry,
};
use crate::sftp::types::{self, FileEntry};

use super::auth::Credentials;
use super::connection::SshConnection;
use super::known_hosts::KnownHostsManager;
use super::reconnect::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// SFTP client for one server and user.
///
/// Cloning is cheap; clones share the session and the transfer registry.
#[derive(Clone)]
pub struct SshClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    credentials: Credentials,
    settings: ClientSettings,
    connector: SftpConnector,
    connection: RwLock<Option<Arc<SshConnection>>>,
    connect_lock: Mutex<()>,
    transfers: Arc<TransferRegistry>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("credentials", &self.inner.credentials)
            .field("transfers", &self.inner.transfers)
            .finish_non_exhaustive()
    }
}

impl SshClient {
    /// Client that authenticates with a password
    pub fn with_password(
        server: impl Into<String>,
        user: impl Into<String>,
        password: &str,
    ) -> Self {
        Self::new(
            Credentials::password(server, user, password),
            ClientSettings::default(),
        )
    }

    /// Client that authenticates with the default private key, decrypted
    /// with `passphrase` (empty for an unencrypted key)
    pub fn with_passphrase(
        server: impl Into<String>,
        user: impl Into<String>,
        passphrase: &str,
    ) -> Self {
        Self::new(
            Credentials::passphrase(server, user, passphrase),
            ClientSettings::default(),
        )
    }

    pub fn new(credentials: Credentials, settings: ClientSettings) -> Self {
        // An explicit known_hosts file replaces both default files
        let known_hosts = match &settings.known_hosts_path {
            Some(path) => KnownHostsManager::with_paths(Some(path.clone()), None),
            None => KnownHostsManager::new(),
        };
        let connector = SftpConnector::new(settings.clone(), Arc::new(known_hosts));

        Self {
            inner: Arc::new(ClientInner {
                credentials,
                settings,
                connector,
                connection: RwLock::new(None),
                connect_lock: Mutex::new(()),
                transfers: Arc::new(TransferRegistry::new()),
            }),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Establish the SSH connection and SFTP session.
    ///
    /// Does nothing when already connected. After a disconnect or session
    /// loss a new session is established.
    pub async fn connect(&self) -> Result<(), SshError> {
        let _guard = self.inner.connect_lock.lock().await;

        if self.inner.live_connection().await.is_some() {
            tracing::debug!("Already connected to {}", self.inner.credentials.server);
            return Ok(());
        }

        let endpoint = self.inner.credentials.endpoint()?;
        let user = &self.inner.credentials.user;
        tracing::info!(
            "Connecting to {} as {} ({} auth)",
            endpoint,
            user,
            self.inner.credentials.auth.method_name()
        );

        let connection = self
            .inner
            .connector
            .connect(&endpoint, user, &self.inner.credentials.auth)
            .await?;
        *self.inner.connection.write().await = Some(Arc::new(connection));

        tracing::info!("Connected to {}", endpoint);
        Ok(())
    }

    /// [`connect`](Self::connect), retrying transport failures with backoff
    pub async fn connect_with_retry(&self, policy: &ReconnectPolicy) -> Result<(), SshError> {
        policy.retry(|_| self.connect()).await
    }

    /// Fail every in-flight transfer and close the session
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        let connection = self.inner.connection.write().await.take();
        self.inner.transfers.close_all();
        if let Some(connection) = connection {
            connection.disconnect("client disconnect").await;
            tracing::info!("Disconnected from {}", connection.endpoint());
        }
    }

    pub async fn state(&self) -> SessionState {
        match self.inner.live_connection().await {
            Some(_) => SessionState::Connected,
            None => SessionState::Disconnected,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Remote login directory
    pub async fn home_dir(&self) -> Result<String, SftpError> {
        let connection = self.inner.require_connection().await?;
        Ok(connection.sftp().home_dir().to_string())
    }

    /// Whether anything exists at `path`
    pub async fn file_exists(&self, path: &str) -> Result<bool, SftpError> {
        self.inner
            .run_op("file_exists", |conn| async move { conn.sftp().exists(path).await })
            .await
    }

    /// Immediate children of the directory at `path`
    pub async fn read_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        self.inner
            .run_op("read_dir", |conn| async move { conn.sftp().list_dir(path).await })
            .await
    }

    /// Create one directory; an existing directory is not an error
    pub async fn create_folder(&self, path: &str) -> Result<(), SftpError> {
        self.inner
            .run_op("create_folder", |conn| async move {
                conn.sftp().create_dir(path).await
            })
            .await
    }

    /// Remove a directory tree. Stops at the first failure.
    pub async fn remove_folder(&self, path: &str) -> Result<(), SftpError> {
        self.inner
            .run_tree_op("remove_folder", |conn| async move {
                conn.sftp().remove_recursive(path).await
            })
            .await
    }

    /// Copy a file, symlink or directory tree to `destination`
    pub async fn copy(&self, src: &str, destination: &str) -> Result<(), SftpError> {
        let chunk_size = self.inner.settings.chunk_size();
        self.inner
            .run_tree_op("copy", |conn| async move {
                let sftp = conn.sftp();
                let src = sftp.canonicalize(src).await?;
                let destination = absolute_path(sftp.home_dir(), destination);

                let resolved = resolve_destination(sftp, &destination).await?;
                if types::is_same_or_descendant(&resolved, &src) {
                    return Err(SftpError::InvalidOperation(format!(
                        "cannot copy {} into itself ({})",
                        src, destination
                    )));
                }

                tracing::debug!("Copying {} to {}", src, destination);
                sftp.copy_recursive(&src, &destination, chunk_size).await
            })
            .await
    }

    /// Copy `path` next to itself under a free name; returns the new path
    pub async fn duplicate(&self, path: &str) -> Result<String, SftpError> {
        let chunk_size = self.inner.settings.chunk_size();
        self.inner
            .run_tree_op("duplicate", |conn| async move {
                let sftp = conn.sftp();
                let src = sftp.canonicalize(path).await?;
                let parent = types::parent_remote(&src).ok_or_else(|| {
                    SftpError::InvalidOperation("cannot duplicate the root directory".to_string())
                })?;

                let taken: HashSet<String> = sftp
                    .list_dir(parent)
                    .await?
                    .into_iter()
                    .map(|entry| entry.name)
                    .collect();
                let name = types::unique_name(types::file_name_remote(&src), |name| {
                    taken.contains(name)
                })
                .ok_or_else(|| {
                    SftpError::InvalidOperation(format!("no free name for a copy of {}", src))
                })?;

                let destination = types::join_remote(parent, &name);
                sftp.copy_recursive(&src, &destination, chunk_size).await?;
                Ok(destination)
            })
            .await
    }

    /// Rename `file` to `to_path`
    pub async fn move_file(&self, file: &str, to_path: &str) -> Result<(), SftpError> {
        self.inner
            .run_op("move_file", |conn| async move {
                conn.sftp().rename(file, to_path).await
            })
            .await
    }

    /// Remove one file or symlink
    pub async fn unlink(&self, path: &str) -> Result<(), SftpError> {
        self.inner
            .run_op("unlink", |conn| async move { conn.sftp().remove_file(path).await })
            .await
    }

    /// Write `data` to `path` in the background.
    ///
    /// `progress` receives the number of bytes written so far after each
    /// chunk; `completion` is called once at the end unless the transfer is
    /// stopped with [`stop_task`](Self::stop_task).
    pub async fn upload_file<P, C>(
        &self,
        data: Vec<u8>,
        path: &str,
        progress: P,
        completion: C,
    ) -> Result<TransferId, SftpError>
    where
        P: FnMut(u64) + Send + 'static,
        C: FnOnce(Result<(), SftpError>) + Send + 'static,
    {
        let conn = self.inner.require_connection().await?;
        let inner = self.inner.clone();
        let chunk_size = self.inner.settings.chunk_size();
        let remote_path = path.to_string();
        let total = data.len() as u64;

        let id = self.inner.transfers.spawn(
            TransferKind::Upload,
            path,
            Some(total),
            move |reporter| async move {
                let result = async {
                    let mut file = conn.sftp().open_write(&remote_path).await?;
                    transfer::pump_upload(&mut file, &data, chunk_size, &reporter)
                        .await
                        .map_err(|e| SftpError::Remote {
                            path: remote_path.clone(),
                            reason: e.to_string(),
                        })
                }
                .await;
                inner.check_session(&conn, result).await
            },
            progress,
            completion,
        );

        tracing::debug!("Uploading {} bytes to {} as {}", total, path, id);
        Ok(id)
    }

    /// Read the file at `path` in the background; `completion` receives the
    /// whole payload
    pub async fn download<P, C>(
        &self,
        path: &str,
        progress: P,
        completion: C,
    ) -> Result<TransferId, SftpError>
    where
        P: FnMut(u64) + Send + 'static,
        C: FnOnce(Result<Vec<u8>, SftpError>) + Send + 'static,
    {
        self.start_download(path, |data| async move { Ok(data) }, progress, completion)
            .await
    }

    /// Download into `local_dir` under a name not already taken there.
    /// `completion` receives the path of the written file.
    pub async fn download_to_dir<P, C>(
        &self,
        path: &str,
        local_dir: impl Into<PathBuf>,
        progress: P,
        completion: C,
    ) -> Result<TransferId, SftpError>
    where
        P: FnMut(u64) + Send + 'static,
        C: FnOnce(Result<PathBuf, SftpError>) + Send + 'static,
    {
        let local_dir = local_dir.into();
        let file_name = types::file_name_remote(path).to_string();

        let store = move |data: Vec<u8>| async move {
            tokio::task::spawn_blocking(move || {
                fs_utils::write_unique_private_file(&local_dir, &file_name, &data)
            })
            .await
            .map_err(|e| SftpError::LocalIo(e.to_string()))?
            .map_err(|e| SftpError::LocalIo(e.to_string()))
        };

        self.start_download(path, store, progress, completion).await
    }

    async fn start_download<T, S, SFut, P, C>(
        &self,
        path: &str,
        store: S,
        progress: P,
        completion: C,
    ) -> Result<TransferId, SftpError>
    where
        T: Send + 'static,
        S: FnOnce(Vec<u8>) -> SFut + Send + 'static,
        SFut: Future<Output = Result<T, SftpError>> + Send,
        P: FnMut(u64) + Send + 'static,
        C: FnOnce(Result<T, SftpError>) + Send + 'static,
    {
        let conn = self.inner.require_connection().await?;
        let inner = self.inner.clone();
        let chunk_size = self.inner.settings.chunk_size();
        let remote_path = path.to_string();

        let id = self.inner.transfers.spawn(
            TransferKind::Download,
            path,
            None,
            move |reporter| async move {
                let result = async {
                    let sftp = conn.sftp();
                    let attrs = sftp.stat(&remote_path).await?;
                    if attrs.is_dir() {
                        return Err(SftpError::InvalidOperation(format!(
                            "{} is a directory",
                            remote_path
                        )));
                    }
                    if let Some(size) = attrs.size {
                        reporter.set_total(size);
                    }

                    let mut file = sftp.open_read(&remote_path).await?;
                    transfer::pump_download(&mut file, chunk_size, attrs.size, &reporter)
                        .await
                        .map_err(|e| SftpError::Remote {
                            path: remote_path.clone(),
                            reason: e.to_string(),
                        })
                }
                .await;

                let data = inner.check_session(&conn, result).await?;
                store(data).await
            },
            progress,
            completion,
        );

        tracing::debug!("Downloading {} as {}", path, id);
        Ok(id)
    }

    /// Stop a transfer. No callbacks for it are delivered after this
    /// returns. Returns false if `id` is unknown or already finished.
    pub fn stop_task(&self, id: TransferId) -> bool {
        self.inner.transfers.cancel(id)
    }

    /// In-flight transfers, oldest first
    pub fn transfers(&self) -> Vec<TransferInfo> {
        self.inner.transfers.snapshot()
    }
}

impl ClientInner {
    /// The current connection, dropped first if its transport has closed
    async fn live_connection(&self) -> Option<Arc<SshConnection>> {
        let connection = self.connection.read().await.clone()?;
        if connection.is_closed() {
            self.drop_connection(&connection, "transport closed").await;
            return None;
        }
        Some(connection)
    }

    async fn require_connection(&self) -> Result<Arc<SshConnection>, SftpError> {
        self.live_connection().await.ok_or(SftpError::NotConnected)
    }

    /// Forget `connection` if it is still the current one and fail its
    /// transfers
    async fn drop_connection(&self, connection: &Arc<SshConnection>, reason: &str) {
        let removed = {
            let mut current = self.connection.write().await;
            match current.as_ref() {
                Some(existing) if Arc::ptr_eq(existing, connection) => current.take(),
                _ => None,
            }
        };

        if let Some(removed) = removed {
            tracing::warn!("SFTP session to {} lost: {}", removed.endpoint(), reason);
            self.transfers.close_all();
            removed.disconnect(reason).await;
        }
    }

    /// Turn errors that leave the session unusable into `SessionLost`,
    /// dropping the session
    async fn check_session<T>(
        &self,
        connection: &Arc<SshConnection>,
        result: Result<T, SftpError>,
    ) -> Result<T, SftpError> {
        match result {
            Err(e) if e.is_session_fatal() || connection.is_closed() => {
                let reason = e.to_string();
                self.drop_connection(connection, &reason).await;
                Err(match e {
                    SftpError::SessionLost(_) | SftpError::SessionClosed => e,
                    other => SftpError::SessionLost(other.to_string()),
                })
            }
            other => other,
        }
    }

    /// Single-request operation bounded by the operation timeout
    async fn run_op<T, F, Fut>(&self, op: &str, f: F) -> Result<T, SftpError>
    where
        F: FnOnce(Arc<SshConnection>) -> Fut,
        Fut: Future<Output = Result<T, SftpError>>,
    {
        self.run(op, Some(self.settings.operation_timeout()), f).await
    }

    /// Multi-request operation over a whole tree; not time bounded
    async fn run_tree_op<T, F, Fut>(&self, op: &str, f: F) -> Result<T, SftpError>
    where
        F: FnOnce(Arc<SshConnection>) -> Fut,
        Fut: Future<Output = Result<T, SftpError>>,
    {
        self.run(op, None, f).await
    }

    async fn run<T, F, Fut>(&self, op: &str, limit: Option<Duration>, f: F) -> Result<T, SftpError>
    where
        F: FnOnce(Arc<SshConnection>) -> Fut,
        Fut: Future<Output = Result<T, SftpError>>,
    {
        let connection = self.require_connection().await?;
        let fut = f(connection.clone());

        let result = match limit {
            Some(limit) => timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(SftpError::Timeout(op.to_string()))),
            None => fut.await,
        };

        if let Err(e) = &result {
            tracing::debug!("{} failed: {}", op, e);
        }
        self.check_session(&connection, result).await
    }
}

/// Resolve a relative remote path against the login directory
fn absolute_path(home_dir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        let relative = path.trim_start_matches("./");
        if relative.is_empty() || relative == "." {
            home_dir.to_string()
        } else {
            types::join_remote(home_dir, relative)
        }
    }
}

/// Canonical form of an absolute `path` that may not exist yet: the server
/// resolves the parent (`..`, doubled slashes, symlinks) and the last
/// component is joined back on
async fn resolve_destination(sftp: &SftpSession, path: &str) -> Result<String, SftpError> {
    match sftp.canonicalize(path).await {
        Ok(resolved) => Ok(resolved),
        Err(SftpError::NotFound(_)) => {
            let parent = types::parent_remote(path).unwrap_or("/");
            let parent = sftp.canonicalize(parent).await?;
            Ok(types::join_remote(&parent, types::file_name_remote(path)))
        }
        Err(e) => Err(e),
    }
}
