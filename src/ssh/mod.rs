//! SSH client module
//!
//! Provides connection, authentication, host key checking and the
//! [`SshClient`] operations built on top of them.

pub mod auth;
pub mod client;
pub mod connection;
pub mod handler;
pub mod known_hosts;
pub mod reconnect;

pub use auth::{AuthMode, Credentials};
pub use client::{SessionState, SshClient};
pub use connection::SshConnection;
pub use reconnect::ReconnectPolicy;
