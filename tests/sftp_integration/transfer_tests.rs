//! Upload, download and cancellation tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use sshview::{Credentials, SftpError, SshClient, TransferKind};

use super::fixtures::{SftpTestEnvironment, download, recorder, scratch_dir, upload};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Client with a small chunk size so transfers take many steps
fn small_chunk_client(env: &SftpTestEnvironment) -> SshClient {
    let mut settings = env.settings();
    settings.transfer_chunk_size = 4096;
    SshClient::new(
        Credentials::password(
            env.server.server(),
            &env.server.username,
            &env.server.password,
        ),
        settings,
    )
}

/// Progress is non-decreasing, ends at the payload size, and completion
/// follows the last progress call exactly once
#[tokio::test]
async fn test_upload_progress_and_completion() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = small_chunk_client(&env);
    client.connect().await.unwrap();
    let dir = scratch_dir(&client, "upload").await;

    let data = payload(100_000);
    let (progress, completion, mut record) = recorder::<()>();
    client
        .upload_file(data.clone(), &format!("{dir}/up.bin"), progress, completion)
        .await
        .unwrap();

    let (seen, result) = record.wait().await;
    result.unwrap();
    assert_eq!(record.completions(), 1);

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(*seen.last().unwrap(), data.len() as u64);
    assert_eq!(seen.len(), data.len().div_ceil(4096));

    assert_eq!(download(&client, &format!("{dir}/up.bin")).await.unwrap(), data);
    client.remove_folder(&dir).await.unwrap();
}

#[tokio::test]
async fn test_empty_upload_reports_zero() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = env.connected_client().await;
    let dir = scratch_dir(&client, "empty").await;

    let path = format!("{dir}/empty");
    let (progress, completion, mut record) = recorder::<()>();
    client
        .upload_file(Vec::new(), &path, progress, completion)
        .await
        .unwrap();
    let (seen, result) = record.wait().await;

    result.unwrap();
    assert_eq!(seen, [0]);
    assert!(client.file_exists(&path).await.unwrap());
    assert!(download(&client, &path).await.unwrap().is_empty());

    client.remove_folder(&dir).await.unwrap();
}

/// A downloaded payload is byte-identical to what was uploaded
#[tokio::test]
async fn test_download_round_trip() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = env.connected_client().await;
    let dir = scratch_dir(&client, "download").await;

    let data = payload(300_000);
    let path = format!("{dir}/blob.bin");
    upload(&client, &path, &data).await;

    let (progress, completion, mut record) = recorder::<Vec<u8>>();
    client.download(&path, progress, completion).await.unwrap();
    let (seen, result) = record.wait().await;

    assert_eq!(result.unwrap(), data);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*seen.last().unwrap(), data.len() as u64);

    client.remove_folder(&dir).await.unwrap();
}

#[tokio::test]
async fn test_download_missing_file_fails_through_completion() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = env.connected_client().await;
    let dir = scratch_dir(&client, "dlmissing").await;

    let (progress, completion, mut record) = recorder::<Vec<u8>>();
    client
        .download(&format!("{dir}/nope"), progress, completion)
        .await
        .unwrap();
    let (seen, result) = record.wait().await;

    assert!(seen.is_empty());
    assert!(matches!(result, Err(SftpError::NotFound(_))));

    client.remove_folder(&dir).await.unwrap();
}

#[tokio::test]
async fn test_download_to_dir_never_overwrites() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = env.connected_client().await;
    let dir = scratch_dir(&client, "todir").await;
    let local = tempfile::tempdir().unwrap();

    let path = format!("{dir}/notes.txt");
    upload(&client, &path, b"remote notes").await;
    std::fs::write(local.path().join("notes.txt"), "local notes").unwrap();

    let (progress, completion, mut record) = recorder::<std::path::PathBuf>();
    client
        .download_to_dir(&path, local.path(), progress, completion)
        .await
        .unwrap();
    let (_, result) = record.wait().await;

    let written = result.unwrap();
    assert_eq!(written, local.path().join("notes 1.txt"));
    assert_eq!(std::fs::read(&written).unwrap(), b"remote notes");
    assert_eq!(
        std::fs::read_to_string(local.path().join("notes.txt")).unwrap(),
        "local notes"
    );

    client.remove_folder(&dir).await.unwrap();
}

/// After stop_task returns, no callbacks arrive for that upload
#[tokio::test]
async fn test_stop_task_silences_upload() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = small_chunk_client(&env);
    client.connect().await.unwrap();
    let dir = scratch_dir(&client, "cancel").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicBool::new(false));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let progress_calls = calls.clone();
    let completion_flag = completed.clone();
    let id = client
        .upload_file(
            payload(32 * 1024 * 1024),
            &format!("{dir}/big.bin"),
            move |bytes| {
                progress_calls.fetch_add(1, Ordering::SeqCst);
                let _ = started_tx.send(bytes);
            },
            move |_| completion_flag.store(true, Ordering::SeqCst),
        )
        .await
        .unwrap();

    started_rx.recv().await.expect("upload made progress");
    assert!(client.transfers().iter().any(|t| t.id == id));
    assert!(client.stop_task(id), "upload finished before it could be stopped");
    let calls_at_stop = calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(calls.load(Ordering::SeqCst), calls_at_stop);
    assert!(!completed.load(Ordering::SeqCst));
    assert!(client.transfers().iter().all(|t| t.id != id));
    // Stopping again is a no-op
    assert!(!client.stop_task(id));

    // The session is still usable
    assert!(client.file_exists(&dir).await.unwrap());
    client.remove_folder(&dir).await.unwrap();
}

/// Stopping an unknown id leaves other transfers alone
#[tokio::test]
async fn test_stop_unknown_id_is_noop() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = env.connected_client().await;
    let dir = scratch_dir(&client, "noop").await;

    // A finished transfer's id is stale
    let path = format!("{dir}/first.bin");
    let (progress, completion, mut record) = recorder::<()>();
    let stale = client
        .upload_file(payload(10), &path, progress, completion)
        .await
        .unwrap();
    record.wait().await.1.unwrap();

    let data = payload(200_000);
    let (progress, completion, mut record) = recorder::<()>();
    let active = client
        .upload_file(data.clone(), &format!("{dir}/second.bin"), progress, completion)
        .await
        .unwrap();
    assert_ne!(stale, active);

    assert!(!client.stop_task(stale));
    let (seen, result) = record.wait().await;

    result.unwrap();
    assert_eq!(*seen.last().unwrap(), data.len() as u64);
    assert_eq!(
        download(&client, &format!("{dir}/second.bin")).await.unwrap(),
        data
    );

    client.remove_folder(&dir).await.unwrap();
}

/// Disconnecting fails in-flight transfers with SessionClosed
#[tokio::test]
async fn test_disconnect_fails_in_flight_transfers() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    let client = small_chunk_client(&env);
    client.connect().await.unwrap();
    let dir = scratch_dir(&client, "closed").await;

    let (progress, completion, mut record) = recorder::<()>();
    client
        .upload_file(
            payload(32 * 1024 * 1024),
            &format!("{dir}/big.bin"),
            progress,
            completion,
        )
        .await
        .unwrap();

    let transfers = client.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].kind, TransferKind::Upload);

    client.disconnect().await;
    let (_, result) = record.wait().await;
    assert!(matches!(result, Err(SftpError::SessionClosed)));
    assert_eq!(record.completions(), 1);
    assert!(client.transfers().is_empty());

    client.connect().await.unwrap();
    client.remove_folder(&dir).await.unwrap();
}
