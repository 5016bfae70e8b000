//! Security event logging for audit trails.
//!
//! Structured events for authentication attempts, session establishment and
//! host key decisions. Everything here logs with `target: "security"` so the
//! audit stream can be filtered on its own:
//!
//! ```bash
//! RUST_LOG=security=info my-app
//! ```

use tracing::{info, warn};

/// Log an SSH authentication attempt.
///
/// Called before attempting to authenticate with a remote host.
pub fn log_auth_attempt(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_attempt",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication attempt"
    );
}

/// Log a successful SSH authentication.
pub fn log_auth_success(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_success",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication succeeded"
    );
}

/// Log a failed SSH authentication attempt.
pub fn log_auth_failure(host: &str, port: u16, username: &str, method: &str, reason: &str) {
    warn!(
        target: "security",
        event = "auth_failure",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        reason = %reason,
        "SSH authentication failed"
    );
}

/// Log an SFTP session establishment.
pub fn log_sftp_connect(host: &str, port: u16, username: &str) {
    info!(
        target: "security",
        event = "sftp_connect",
        host = %host,
        port = port,
        username = %username,
        "SFTP session established"
    );
}

/// Log the end of an SFTP session, whether requested or lost.
pub fn log_sftp_disconnect(host: &str, port: u16, username: &str, reason: &str) {
    info!(
        target: "security",
        event = "sftp_disconnect",
        host = %host,
        port = port,
        username = %username,
        reason = %reason,
        "SFTP session ended"
    );
}

/// Log a host key that was trusted under the active policy.
pub fn log_host_key_accepted(host: &str, port: u16, fingerprint: &str, was_unknown: bool) {
    if was_unknown {
        info!(
            target: "security",
            event = "host_key_learned",
            host = %host,
            port = port,
            fingerprint = %fingerprint,
            "Trusted previously unknown host key"
        );
    } else {
        info!(
            target: "security",
            event = "host_key_accepted",
            host = %host,
            port = port,
            fingerprint = %fingerprint,
            "Host key matches known_hosts"
        );
    }
}

/// Log a host key that was refused.
pub fn log_host_key_rejected(host: &str, port: u16, fingerprint: &str, reason: &str) {
    warn!(
        target: "security",
        event = "host_key_rejected",
        host = %host,
        port = port,
        fingerprint = %fingerprint,
        reason = %reason,
        "Host key rejected"
    );
}
