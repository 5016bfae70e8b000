use std::future::Future;
use std::sync::Arc;

use russh::client::Handler;
use russh::keys::PublicKey;

use crate::config::HostKeyPolicy;
use crate::error::SshError;
use crate::security_log;

use super::known_hosts::{HostKeyStatus, KnownHostsManager};

/// What to do with a server key, given the policy and what known_hosts says
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostKeyDecision {
    Accept,
    /// Accept and append to known_hosts
    Learn,
    Reject(String),
}

pub(crate) fn decide(policy: HostKeyPolicy, status: &HostKeyStatus) -> HostKeyDecision {
    match (policy, status) {
        (_, HostKeyStatus::Revoked { .. }) => {
            HostKeyDecision::Reject("Host key has been revoked".to_string())
        }
        (HostKeyPolicy::AcceptAny, _) => HostKeyDecision::Accept,
        (_, HostKeyStatus::Known) => HostKeyDecision::Accept,
        (_, HostKeyStatus::Changed {
            old_fingerprint, ..
        }) => HostKeyDecision::Reject(format!(
            "Host key changed (previously {}); remove the old entry from known_hosts if this is expected",
            old_fingerprint
        )),
        (HostKeyPolicy::Strict, HostKeyStatus::Unknown { .. }) => {
            HostKeyDecision::Reject("Host is not in known_hosts".to_string())
        }
        (HostKeyPolicy::AcceptNew, HostKeyStatus::Unknown { .. }) => HostKeyDecision::Learn,
    }
}

/// SSH client handler implementation
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHostsManager>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts: Arc<KnownHostsManager>,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts,
        }
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let host = self.host.clone();
        let port = self.port;
        let policy = self.policy;
        let known_hosts = self.known_hosts.clone();
        let key = server_public_key.clone();

        async move {
            let fingerprint = KnownHostsManager::fingerprint(&key);

            let status = tokio::task::spawn_blocking({
                let known_hosts = known_hosts.clone();
                let host = host.clone();
                let key = key.clone();
                move || known_hosts.check_host_key(&host, port, &key)
            })
            .await
            .map_err(|e| SshError::HostKeyVerification(format!("Host key check failed: {}", e)))?;

            match decide(policy, &status) {
                HostKeyDecision::Accept => {
                    if policy == HostKeyPolicy::AcceptAny && status != HostKeyStatus::Known {
                        tracing::warn!(
                            "Accepting unverified host key for {}:{} ({})",
                            host,
                            port,
                            fingerprint
                        );
                    } else {
                        tracing::debug!("Host key verified for {}:{}", host, port);
                    }
                    security_log::log_host_key_accepted(&host, port, &fingerprint, false);
                    Ok(true)
                }
                HostKeyDecision::Learn => {
                    // Fail closed if the key cannot be persisted
                    tokio::task::spawn_blocking({
                        let host = host.clone();
                        move || known_hosts.add_host_key(&host, port, &key)
                    })
                    .await
                    .map_err(|e| {
                        SshError::HostKeyVerification(format!("Host key store task failed: {}", e))
                    })??;

                    tracing::info!("Learned new host key for {}:{}", host, port);
                    security_log::log_host_key_accepted(&host, port, &fingerprint, true);
                    Ok(true)
                }
                HostKeyDecision::Reject(reason) => {
                    tracing::warn!("Rejecting host key for {}:{}: {}", host, port, reason);
                    security_log::log_host_key_rejected(&host, port, &fingerprint, &reason);
                    Err(SshError::HostKeyVerification(reason))
                }
            }
        }
    }
}
