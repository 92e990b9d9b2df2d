//! Error types for teleprompt.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for teleprompt operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (connect, send, receive)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Expect engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Mode tree / router errors
    #[error("Mode error: {0}")]
    Mode(#[from] ModeError),
}

/// Transport layer errors (connection, authentication, I/O).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Transport not connected
    #[error("Not connected - call connect() first")]
    NotConnected,

    /// No data arrived within the per-read timeout
    #[error("No data within {0:?}")]
    ReadTimeout(Duration),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connection pool errors (checkout, creation).
#[derive(Error, Debug)]
pub enum PoolError {
    /// No compatible session became available within the checkout timeout
    #[error("Pool exhausted: no session available within {waited:?}")]
    Exhausted { waited: Duration },

    /// Every offered factory failed to produce a session
    #[error("Session creation failed for every factory (attempted: {})", attempted.join(", "))]
    CreationFailed { attempted: Vec<String> },
}

/// Expect engine errors (prompt resolution, loop budgets, device-reported failures).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Explicit command prompt disagrees with the session's resolved prompt
    #[error("Prompt mismatch: command expects '{expected}' but session resolved '{resolved}'")]
    PromptMismatch { expected: String, resolved: String },

    /// No prompt available to match against
    #[error("No prompt available for command '{command}': none cached and none given")]
    NoPrompt { command: String },

    /// No forward progress: the empty-read budget was exhausted
    #[error("Loop limit exceeded for '{command}' (no data after {empty_reads} reads); output so far: {output:?}")]
    LoopLimitExceeded {
        command: String,
        empty_reads: u32,
        output: String,
    },

    /// An action rule (or short rule sequence) fired in a repeating cycle
    #[error("Action loop detected on pattern '{pattern}'; output so far: {output:?}")]
    ActionLoopDetected { pattern: String, output: String },

    /// A device-reported error matched the command's error table
    #[error("Command '{command}' failed: {message} (matched '{pattern}')")]
    CommandFailed {
        command: String,
        message: String,
        pattern: String,
        output: String,
    },

    /// No stable prompt could be resolved from the output tail
    #[error("Cannot resolve a prompt from output tail: {tail:?}")]
    CannotResolvePrompt { tail: String },
}

/// Mode tree and router errors.
#[derive(Error, Debug)]
pub enum ModeError {
    /// No known mode prompt matched during mode discovery
    #[error("Cannot determine current mode from output tail: {tail:?}")]
    CannotDetermineMode { tail: String },

    /// Mode name not present in the tree
    #[error("Unknown mode '{name}'")]
    UnknownMode { name: String },

    /// Mode tree failed validation
    #[error("Invalid mode tree: {message}")]
    InvalidTree { message: String },
}

/// Result type alias using teleprompt's Error.
pub type Result<T> = std::result::Result<T, Error>;
