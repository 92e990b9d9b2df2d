//! Transport capability consumed by the expect engine, plus the shipped
//! SSH and raw-TCP adapters.

mod ssh;
mod tcp;

pub use ssh::SshTransport;
pub use tcp::TcpTransport;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;

/// The minimal operations the core requires from a live connection.
///
/// Implemented by the shipped SSH/TCP adapters; anything prompt-driven that
/// can send text and receive text with a timeout fits behind this trait.
#[async_trait]
pub trait Transport: Send {
    /// Establish (or re-establish) the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send raw text to the remote side.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Receive whatever is available, blocking at most `timeout`.
    ///
    /// Returns `TransportError::ReadTimeout` when nothing arrives in time
    /// rather than blocking forever.
    async fn receive(&mut self, timeout: Duration) -> Result<String>;

    /// Whether the connection is believed alive.
    fn is_active(&self) -> bool;
}

/// Connection parameters shared by all transports.
///
/// Equality (used for pool compatibility matching) compares every field,
/// including the secret material, so a session opened with different
/// credentials is never silently reused.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Target host (hostname or IP address).
    pub host: String,

    /// Target port.
    pub port: u16,

    /// Username for authentication (ignored by the raw TCP transport).
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection establishment timeout.
    pub connect_timeout: Duration,

    /// Terminal width for PTY-capable transports.
    pub terminal_width: u32,

    /// Terminal height for PTY-capable transports.
    pub terminal_height: u32,
}

impl ConnectParams {
    /// Create parameters for `host:port` with defaults for everything else.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            auth: AuthMethod::None,
            connect_timeout: Duration::from_secs(30),
            terminal_width: 511,
            terminal_height: 24,
        }
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Use password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Password(SecretString::from(password.into()));
        self
    }

    /// Use private key authentication.
    pub fn private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: path.into(),
            passphrase: None,
        };
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for ConnectParams {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.auth == other.auth
    }
}

impl Eq for ConnectParams {}

/// Authentication method for transports that authenticate.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication (raw TCP, lab gear).
    None,

    /// Password authentication. The secret never appears in `Debug` output.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

impl PartialEq for AuthMethod {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Password(a), Self::Password(b)) => a.expose_secret() == b.expose_secret(),
            (
                Self::PrivateKey { path: pa, passphrase: sa },
                Self::PrivateKey { path: pb, passphrase: sb },
            ) => {
                pa == pb
                    && sa.as_ref().map(ExposeSecret::expose_secret)
                        == sb.as_ref().map(ExposeSecret::expose_secret)
            }
            _ => false,
        }
    }
}

impl Eq for AuthMethod {}
