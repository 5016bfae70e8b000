//! Connection and authentication tests

use sshview::config::HostKeyPolicy;
use sshview::{Credentials, SessionState, SftpError, SshClient, SshError};

use super::fixtures::SftpTestEnvironment;

/// Test successful connection with password authentication
#[tokio::test]
async fn test_password_auth_success() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");

    let client = env.password_client();
    let result = client.connect().await;

    assert!(
        result.is_ok(),
        "Password auth should succeed: {:?}",
        result.err()
    );
    assert_eq!(client.state().await, SessionState::Connected);

    let home = client.home_dir().await.expect("home dir");
    assert!(home.starts_with('/'), "home dir should be absolute: {home}");
}

/// Test that a wrong password is reported as an authentication failure
#[tokio::test]
async fn test_wrong_password_fails() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");

    let client = env.client(Credentials::password(
        env.server.server(),
        &env.server.username,
        "definitely-wrong",
    ));
    let result = client.connect().await;

    assert!(
        matches!(result, Err(SshError::AuthenticationFailed(_))),
        "Expected authentication failure, got {:?}",
        result
    );
    assert!(!client.is_connected().await);
}

/// Test public key authentication with an unencrypted key
#[tokio::test]
async fn test_pubkey_auth_success() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    if !env.keys_available() {
        eprintln!("Skipping test: test keys not generated");
        return;
    }

    let client = env.client(env.key_credentials(&env.server.private_key_path, ""));
    let result = client.connect().await;

    assert!(
        result.is_ok(),
        "Public key auth should succeed: {:?}",
        result.err()
    );
}

/// Test public key authentication with an encrypted key and its passphrase
#[tokio::test]
async fn test_encrypted_key_with_passphrase() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    if !env.keys_available() {
        eprintln!("Skipping test: test keys not generated");
        return;
    }

    let client = env.client(env.key_credentials(
        &env.server.encrypted_key_path,
        &env.server.key_passphrase,
    ));
    let result = client.connect().await;

    assert!(
        result.is_ok(),
        "Encrypted key auth should succeed: {:?}",
        result.err()
    );
}

/// Test that a wrong passphrase is reported before talking to the server
#[tokio::test]
async fn test_encrypted_key_wrong_passphrase() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    if !env.keys_available() {
        eprintln!("Skipping test: test keys not generated");
        return;
    }

    let client = env.client(env.key_credentials(&env.server.encrypted_key_path, "nope"));
    let result = client.connect().await;

    assert!(
        matches!(result, Err(SshError::KeyFilePassphraseInvalid(_))),
        "Expected wrong passphrase error, got {:?}",
        result
    );
}

/// Connecting twice is a no-op
#[tokio::test]
async fn test_connect_twice_is_noop() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");

    let client = env.connected_client().await;
    let home = client.home_dir().await.expect("home dir");

    client.connect().await.expect("second connect");
    assert!(client.is_connected().await);
    assert_eq!(client.home_dir().await.expect("home dir"), home);
}

/// After disconnect, operations fail until the client connects again
#[tokio::test]
async fn test_disconnect_and_reconnect() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");

    let client = env.connected_client().await;
    client.disconnect().await;

    assert_eq!(client.state().await, SessionState::Disconnected);
    assert!(matches!(
        client.file_exists("/").await,
        Err(SftpError::NotConnected)
    ));

    client.connect().await.expect("reconnect");
    assert!(client.file_exists("/").await.expect("file_exists"));
}

/// A new host key is learned under the default policy and then verified
#[tokio::test]
async fn test_host_key_learned_on_first_connect() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");
    assert!(!env.known_hosts_path.exists());

    let client = env.connected_client().await;
    client.disconnect().await;

    let contents = std::fs::read_to_string(&env.known_hosts_path).expect("known_hosts written");
    assert!(
        contents.contains("[127.0.0.1]:2222"),
        "known_hosts should contain the server: {contents}"
    );

    // A strict client with the learned file now connects
    let mut settings = env.settings();
    settings.host_key_policy = HostKeyPolicy::Strict;
    let strict = SshClient::new(
        Credentials::password(
            env.server.server(),
            &env.server.username,
            &env.server.password,
        ),
        settings,
    );
    strict.connect().await.expect("strict connect with known key");
}

/// A strict client rejects an unknown server
#[tokio::test]
async fn test_strict_policy_rejects_unknown_host() {
    skip_if_no_docker!();
    let _guard = super::fixtures::acquire_test_lock().await;

    let env = SftpTestEnvironment::new()
        .await
        .expect("Failed to create test environment");

    let mut settings = env.settings();
    settings.host_key_policy = HostKeyPolicy::Strict;
    let client = SshClient::new(
        Credentials::password(
            env.server.server(),
            &env.server.username,
            &env.server.password,
        ),
        settings,
    );

    let result = client.connect().await;
    assert!(
        matches!(result, Err(SshError::HostKeyVerification(_))),
        "Expected host key rejection, got {:?}",
        result
    );
}
