//! Docker-based SFTP test fixtures

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tokio::time::{sleep, timeout};

use sshview::config::{ClientSettings, HostKeyPolicy};
use sshview::{Credentials, SftpError, SshClient};

// Ensure Docker containers are started only once per test run
static DOCKER_INIT: Once = Once::new();
static DOCKER_AVAILABLE: AtomicBool = AtomicBool::new(false);

static TEST_LOCK: Mutex<()> = Mutex::const_new(());
static SCRATCH_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Configuration for the test SSH server
#[derive(Debug, Clone)]
pub struct TestSshServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub private_key_path: PathBuf,
    pub encrypted_key_path: PathBuf,
    pub key_passphrase: String,
}

impl Default for TestSshServer {
    fn default() -> Self {
        let test_keys_dir =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/docker/test_keys");
        Self {
            host: "127.0.0.1".to_string(),
            port: 2222,
            username: "testuser".to_string(),
            password: "testpass123".to_string(),
            private_key_path: test_keys_dir.join("id_ed25519"),
            encrypted_key_path: test_keys_dir.join("id_ed25519_encrypted"),
            key_passphrase: "testpassphrase".to_string(),
        }
    }
}

impl TestSshServer {
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Start Docker containers for SFTP testing
pub fn ensure_docker_started() {
    DOCKER_INIT.call_once(|| {
        let docker_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/docker");

        if Command::new("docker").arg("--version").output().is_err() {
            eprintln!("WARNING: Docker not available, SFTP integration tests will be skipped");
            return;
        }

        let status = if Command::new("docker")
            .args(["compose", "version"])
            .output()
            .is_ok_and(|out| out.status.success())
        {
            Command::new("docker")
                .current_dir(&docker_dir)
                .args(["compose", "up", "-d", "--wait"])
                .status()
        } else if Command::new("docker-compose")
            .arg("--version")
            .output()
            .is_ok()
        {
            Command::new("docker-compose")
                .current_dir(&docker_dir)
                .args(["up", "-d", "--wait"])
                .status()
        } else {
            eprintln!("WARNING: docker compose not available");
            return;
        };

        match status {
            Ok(s) if s.success() => {
                DOCKER_AVAILABLE.store(true, Ordering::SeqCst);
                eprintln!("SFTP test containers started successfully");
            }
            Ok(s) => {
                eprintln!(
                    "Failed to start SFTP test containers: exit code {:?}",
                    s.code()
                );
            }
            Err(e) => {
                eprintln!("Failed to start SFTP test containers: {}", e);
            }
        }
    });
}

/// Check if Docker containers are running
pub fn is_docker_available() -> bool {
    ensure_docker_started();
    DOCKER_AVAILABLE.load(Ordering::SeqCst)
}

/// Serialize tests that share the server
pub async fn acquire_test_lock() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().await
}

/// Wait for SSH server to be ready
pub async fn wait_for_ssh_ready(host: &str, port: u16) -> Result<(), String> {
    let addr = format!("{}:{}", host, port);
    let max_attempts = 30;

    for attempt in 1..=max_attempts {
        match timeout(Duration::from_secs(2), TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => return Ok(()),
            _ => {
                if attempt == max_attempts {
                    return Err(format!(
                        "SSH server not ready after {} attempts",
                        max_attempts
                    ));
                }
                sleep(Duration::from_millis(200)).await;
            }
        }
    }

    Err("SSH server not ready".to_string())
}

/// Test environment with an isolated known_hosts file
pub struct SftpTestEnvironment {
    pub server: TestSshServer,
    pub config_dir: TempDir,
    pub known_hosts_path: PathBuf,
}

impl SftpTestEnvironment {
    pub async fn new() -> Result<Self, String> {
        if !is_docker_available() {
            return Err("Docker not available".to_string());
        }

        let server = TestSshServer::default();
        wait_for_ssh_ready(&server.host, server.port).await?;

        let config_dir = TempDir::new().map_err(|e| format!("Failed to create temp dir: {}", e))?;
        let known_hosts_path = config_dir.path().join("known_hosts");

        Ok(Self {
            server,
            config_dir,
            known_hosts_path,
        })
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            connection_timeout_secs: 10,
            operation_timeout_secs: 30,
            host_key_policy: HostKeyPolicy::AcceptNew,
            known_hosts_path: Some(self.known_hosts_path.clone()),
            ..Default::default()
        }
    }

    pub fn password_client(&self) -> SshClient {
        self.client(Credentials::password(
            self.server.server(),
            &self.server.username,
            &self.server.password,
        ))
    }

    pub fn client(&self, credentials: Credentials) -> SshClient {
        SshClient::new(credentials, self.settings())
    }

    pub fn key_credentials(&self, key_path: &Path, passphrase: &str) -> Credentials {
        Credentials::passphrase(self.server.server(), &self.server.username, passphrase)
            .with_key_path(key_path)
    }

    pub fn keys_available(&self) -> bool {
        self.server.private_key_path.exists() && self.server.encrypted_key_path.exists()
    }

    pub async fn connected_client(&self) -> SshClient {
        let client = self.password_client();
        client.connect().await.expect("Failed to connect");
        client
    }
}

/// Create an empty remote directory below the login directory
pub async fn scratch_dir(client: &SshClient, label: &str) -> String {
    let home = client.home_dir().await.expect("home dir");
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = format!(
        "{}/sshview-test-{}-{}-{}",
        home.trim_end_matches('/'),
        label,
        std::process::id(),
        n
    );
    if client.file_exists(&path).await.expect("exists") {
        client.remove_folder(&path).await.expect("clean scratch dir");
    }
    client.create_folder(&path).await.expect("create scratch dir");
    path
}

/// Progress and completion captured from one transfer
pub struct TransferRecord<T> {
    progress: Arc<StdMutex<Vec<u64>>>,
    completions: Arc<AtomicU32>,
    done: oneshot::Receiver<Result<T, SftpError>>,
}

/// Callbacks that record into a [`TransferRecord`]
#[allow(clippy::type_complexity)]
pub fn recorder<T: Send + 'static>() -> (
    impl FnMut(u64) + Send + 'static,
    impl FnOnce(Result<T, SftpError>) + Send + 'static,
    TransferRecord<T>,
) {
    let progress = Arc::new(StdMutex::new(Vec::new()));
    let completions = Arc::new(AtomicU32::new(0));
    let (done_tx, done_rx) = oneshot::channel();

    let progress_sink = progress.clone();
    let completion_count = completions.clone();
    (
        move |bytes| progress_sink.lock().unwrap().push(bytes),
        move |result| {
            completion_count.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(result);
        },
        TransferRecord {
            progress,
            completions,
            done: done_rx,
        },
    )
}

impl<T> TransferRecord<T> {
    /// Wait for completion; returns the progress values seen before it
    pub async fn wait(&mut self) -> (Vec<u64>, Result<T, SftpError>) {
        let result = timeout(Duration::from_secs(60), &mut self.done)
            .await
            .expect("transfer did not complete in time")
            .expect("completion callback dropped");
        let progress = self.progress.lock().unwrap().clone();
        (progress, result)
    }

    pub fn completions(&self) -> u32 {
        self.completions.load(Ordering::SeqCst)
    }
}

/// Upload `data` to `path` and wait for it to finish
pub async fn upload(client: &SshClient, path: &str, data: &[u8]) {
    let (progress, completion, mut record) = recorder::<()>();
    client
        .upload_file(data.to_vec(), path, progress, completion)
        .await
        .expect("start upload");
    let (_, result) = record.wait().await;
    result.expect("upload failed");
}

/// Download `path` and wait for the payload
pub async fn download(client: &SshClient, path: &str) -> Result<Vec<u8>, SftpError> {
    let (progress, completion, mut record) = recorder::<Vec<u8>>();
    client.download(path, progress, completion).await?;
    record.wait().await.1
}

/// Macro to skip tests when Docker is not available
#[macro_export]
macro_rules! skip_if_no_docker {
    () => {
        if !super::fixtures::is_docker_available() {
            eprintln!("Skipping test: Docker not available");
            return;
        }
    };
}
