//! Input validation for connection parameters.
//!
//! Validates hostnames, ports and usernames, and splits the `server` string a
//! caller hands to [`crate::SshClient`] into a host and a port.

use std::net::IpAddr;

use regex::Regex;
use std::sync::LazyLock;

/// Port used when the server string does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Validation error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

// Pre-compiled regex patterns for validation
static DNS_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap());

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9._-]{0,31}$").unwrap());

/// A validated `host` + `port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a server string into an [`Endpoint`].
///
/// Accepts `host`, `host:port`, `[v6addr]:port` and a bare IPv6 address.
/// The port defaults to 22.
pub fn parse_server(server: &str) -> Result<Endpoint, ValidationError> {
    let server = server.trim();

    if server.is_empty() {
        return Err(ValidationError::new("server", "Server is required"));
    }

    let (host, port) = if let Some(rest) = server.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ValidationError::new("server", "Missing ']' in IPv6 address"))?;
        match after {
            "" => (host, DEFAULT_SSH_PORT),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, validate_port(port)?),
                None => {
                    return Err(ValidationError::new(
                        "server",
                        format!("Unexpected characters after ']': '{}'", after),
                    ));
                }
            },
        }
    } else if server.parse::<IpAddr>().is_ok() {
        // Bare IPv6 addresses contain colons but carry no port
        (server, DEFAULT_SSH_PORT)
    } else {
        match server.rsplit_once(':') {
            Some((host, port)) => (host, validate_port(port)?),
            None => (server, DEFAULT_SSH_PORT),
        }
    };

    validate_hostname(host)?;

    Ok(Endpoint {
        host: host.trim().to_string(),
        port,
    })
}

/// Validate a hostname (DNS name or IP address).
///
/// Accepts:
/// - IPv4 addresses (e.g., "192.168.1.1")
/// - IPv6 addresses (e.g., "::1", "2001:db8::1")
/// - DNS hostnames (RFC 1123 compliant)
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    let hostname = hostname.trim();

    if hostname.is_empty() {
        return Err(ValidationError::new("hostname", "Hostname is required"));
    }

    // DNS max is 253 characters
    if hostname.len() > 253 {
        return Err(ValidationError::new(
            "hostname",
            "Hostname exceeds maximum length of 253 characters",
        ));
    }

    if hostname.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    validate_dns_hostname(hostname)
}

/// Validate a DNS hostname according to RFC 1123.
fn validate_dns_hostname(hostname: &str) -> Result<(), ValidationError> {
    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::new(
                "hostname",
                "Hostname labels must be 1-63 characters",
            ));
        }

        if !DNS_LABEL_REGEX.is_match(label) {
            return Err(ValidationError::new(
                "hostname",
                format!(
                    "Invalid hostname label '{}': must start and end with alphanumeric, may contain hyphens",
                    label
                ),
            ));
        }
    }

    Ok(())
}

/// Validate a port number string and parse it.
pub fn validate_port(port_str: &str) -> Result<u16, ValidationError> {
    let port_str = port_str.trim();

    if port_str.is_empty() {
        return Err(ValidationError::new("port", "Port is required"));
    }

    match port_str.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        Ok(_) => Err(ValidationError::new(
            "port",
            "Port must be between 1 and 65535",
        )),
        Err(_) => Err(ValidationError::new(
            "port",
            format!("Invalid port number: '{}'", port_str),
        )),
    }
}

/// Validate a username for SSH connections.
///
/// Usernames must follow POSIX conventions (dots allowed after the first
/// character) and may not be empty.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::new("username", "Username is required"));
    }

    if username.len() > 32 {
        return Err(ValidationError::new(
            "username",
            "Username exceeds maximum length of 32 characters",
        ));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::new(
            "username",
            "Username must start with letter or underscore, and contain only alphanumeric, dot, underscore, or hyphen",
        ));
    }

    Ok(())
}
