//! OpenSSH known_hosts lookup and learning.
//!
//! Entries are read from the crate's own known_hosts file and from
//! `~/.ssh/known_hosts`. Plain, wildcard (`*`, `?`), negated (`!host`) and
//! hashed (`|1|salt|hash`) host patterns are understood, as are `@revoked`
//! markers. New keys are only ever appended to the writable file.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use data_encoding::BASE64_MIME;
use hmac::{Hmac, Mac};
use russh::keys::{self, HashAlg, PublicKey};
use sha1::Sha1;

use crate::config::paths;
use crate::error::SshError;

/// Result of checking a host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// Key matches a stored key
    Known,
    /// No key of this host is stored yet
    Unknown {
        fingerprint: String,
        key_type: String,
    },
    /// A different key of the same algorithm is stored (potential MITM)
    Changed {
        old_fingerprint: String,
        new_fingerprint: String,
        key_type: String,
    },
    /// Key matches a revoked entry
    Revoked { fingerprint: String },
}

#[derive(Default)]
struct HostKeyScan {
    keys: Vec<PublicKey>,
    revoked_keys: Vec<PublicKey>,
}

/// Reads known_hosts files and appends newly trusted keys
#[derive(Debug, Clone)]
pub struct KnownHostsManager {
    /// File new keys are written to
    primary_path: Option<PathBuf>,
    /// OpenSSH's own file, read only
    ssh_path: Option<PathBuf>,
}

impl KnownHostsManager {
    pub fn new() -> Self {
        Self::with_paths(paths::known_hosts_file(), paths::ssh_known_hosts_file())
    }

    /// Create a manager with explicit paths
    pub fn with_paths(primary_path: Option<PathBuf>, ssh_path: Option<PathBuf>) -> Self {
        Self {
            primary_path,
            ssh_path,
        }
    }

    pub fn primary_path(&self) -> Option<&Path> {
        self.primary_path.as_deref()
    }

    fn read_paths(&self) -> impl Iterator<Item = &PathBuf> {
        let ssh = self
            .ssh_path
            .as_ref()
            .filter(|ssh| self.primary_path.as_ref() != Some(*ssh));
        self.primary_path.iter().chain(ssh)
    }

    /// SHA256 fingerprint of a public key
    pub fn fingerprint(key: &PublicKey) -> String {
        key.fingerprint(HashAlg::Sha256).to_string()
    }

    /// Check a server key against every readable known_hosts file
    pub fn check_host_key(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        let mut scan = HostKeyScan::default();
        for path in self.read_paths() {
            match scan_path(host, port, path) {
                Ok(found) => {
                    scan.keys.extend(found.keys);
                    scan.revoked_keys.extend(found.revoked_keys);
                }
                Err(e) => {
                    tracing::debug!("Failed to read known_hosts {}: {}", path.display(), e);
                }
            }
        }

        let fingerprint = Self::fingerprint(key);
        let key_type = key.algorithm().as_str().to_string();

        if scan.revoked_keys.iter().any(|revoked| revoked == key) {
            return HostKeyStatus::Revoked { fingerprint };
        }

        if scan.keys.iter().any(|known| known == key) {
            return HostKeyStatus::Known;
        }

        // A host may legitimately have keys of several algorithms
        match scan
            .keys
            .iter()
            .find(|known| known.algorithm() == key.algorithm())
        {
            Some(old_key) => HostKeyStatus::Changed {
                old_fingerprint: Self::fingerprint(old_key),
                new_fingerprint: fingerprint,
                key_type,
            },
            None => HostKeyStatus::Unknown {
                fingerprint,
                key_type,
            },
        }
    }

    /// Append a host key to the writable known_hosts file
    pub fn add_host_key(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let path = self.primary_path.as_ref().ok_or_else(|| {
            SshError::HostKeyVerification("No known_hosts path configured".to_string())
        })?;

        if let Some(parent) = path.parent() {
            paths::create_private_dir(parent).map_err(|e| {
                SshError::HostKeyVerification(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        keys::known_hosts::learn_known_hosts_path(host, port, key, path).map_err(|e| {
            SshError::HostKeyVerification(format!(
                "Failed to write known_hosts {}: {}",
                path.display(),
                e
            ))
        })
    }
}

impl Default for KnownHostsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn scan_path(host: &str, port: u16, path: &Path) -> Result<HostKeyScan, SshError> {
    if !path.exists() {
        return Ok(HostKeyScan::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        SshError::HostKeyVerification(format!(
            "Failed to read known_hosts {}: {}",
            path.display(),
            e
        ))
    })?;

    let host_port = if port == 22 {
        Cow::Borrowed(host)
    } else {
        Cow::Owned(format!("[{}]:{}", host, port))
    };

    let mut scan = HostKeyScan::default();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (marker, rest) = match line.strip_prefix('@') {
            Some(stripped) => match stripped.split_once(char::is_whitespace) {
                Some((marker, rest)) => (Some(marker), rest.trim_start()),
                None => continue,
            },
            None => (None, line),
        };

        let mut fields = rest.split_whitespace();
        let (Some(hosts_field), Some(_key_type), Some(key_data)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        if !host_matches(&host_port, host, hosts_field) {
            continue;
        }

        let key = match keys::parse_public_key_base64(key_data) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(
                    "Failed to parse known_hosts key in {} line {}: {}",
                    path.display(),
                    index + 1,
                    e
                );
                continue;
            }
        };

        match marker {
            None => scan.keys.push(key),
            Some("revoked") => scan.revoked_keys.push(key),
            // CA entries sign host certificates, which are not supported
            Some(_) => {}
        }
    }

    Ok(scan)
}

/// Whether a comma separated host field matches; any matching negation wins
fn host_matches(host_port: &str, host: &str, hosts_field: &str) -> bool {
    let mut matched = false;

    for entry in hosts_field.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (negated, pattern) = match entry.strip_prefix('!') {
            Some(pattern) => (true, pattern),
            None => (false, entry),
        };

        if pattern_matches(host_port, host, pattern) {
            if negated {
                return false;
            }
            matched = true;
        }
    }

    matched
}

fn pattern_matches(host_port: &str, host: &str, pattern: &str) -> bool {
    if pattern.starts_with("|1|") {
        return hashed_matches(host_port, pattern);
    }

    if pattern.contains(['*', '?']) {
        return glob_match(pattern, host) || glob_match(pattern, host_port);
    }

    pattern == host || pattern == host_port
}

/// `|1|base64(salt)|base64(hmac_sha1(salt, host))`
fn hashed_matches(host_port: &str, pattern: &str) -> bool {
    let mut parts = pattern.split('|').skip(2);
    let (Some(salt), Some(hash)) = (parts.next(), parts.next()) else {
        return false;
    };

    let (Ok(salt), Ok(hash)) = (
        BASE64_MIME.decode(salt.as_bytes()),
        BASE64_MIME.decode(hash.as_bytes()),
    ) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(host_port.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// Glob match supporting `*` and `?`
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}
