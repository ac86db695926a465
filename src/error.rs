//! Error types for keyscope
//!
//! This module defines the error hierarchy that covers:
//! - Configuration and CLI errors (rejected before any I/O)
//! - Connection errors against a live deployment
//! - Snapshot decode errors
//! - Topology resolution errors
//! - Delete pipeline errors
//!
//! Every variant carries the file, address or pattern it concerns so the
//! message printed to the user is actionable on its own.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for keyscope
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Live endpoint connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Snapshot decode errors
    #[error("Decode error: {0}")]
    Decode(DecodeError),

    /// Topology errors
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Delete pipeline errors
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    /// I/O errors (report files, stdin)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Key filter regex does not compile
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Unknown expiration filter mode
    #[error(
        "Invalid expire mode '{value}': expected one of persistent, volatile, not-expired, expired"
    )]
    InvalidExpireMode { value: String },

    /// Result count must be positive
    #[error("Invalid result count {value}: must be greater than 0")]
    InvalidTopN { value: i64 },

    /// Delete pattern would match everything
    #[error("Refusing to delete with pattern '{pattern}': the pattern must not match every key")]
    UnsafeDeletePattern { pattern: String },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid key separator
    #[error("Invalid key separator '{separator}': separators must not be empty")]
    InvalidSeparator { separator: String },

    /// Source could not be interpreted as files or a redis URL
    #[error("Invalid source '{source_spec}': {reason}")]
    InvalidSource { source_spec: String, reason: String },

    /// Data directory is missing or unusable
    #[error("Invalid data directory '{path}': {reason}")]
    InvalidDataDir { path: PathBuf, reason: String },
}

/// Live endpoint connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Endpoint could not be reached
    #[error("Failed to connect to '{addr}': {reason}")]
    Unreachable { addr: String, reason: String },

    /// Server requires a password but none was given
    #[error("Authentication required by '{addr}': pass a password with -p")]
    AuthRequired { addr: String },

    /// Server rejected the password
    #[error("Authentication failed for '{addr}': wrong password")]
    AuthFailed { addr: String },

    /// Call exceeded the configured timeout
    #[error("Operation '{operation}' on '{addr}' timed out")]
    Timeout { addr: String, operation: String },

    /// Server answered with an error or an unexpected reply
    #[error("Command '{operation}' on '{addr}' failed: {reason}")]
    Command {
        addr: String,
        operation: String,
        reason: String,
    },
}

impl ConnectionError {
    /// Timeouts are the only retryable category; retry policy belongs to the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::Timeout { .. })
    }

    /// Authentication problems never succeed on retry
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ConnectionError::AuthRequired { .. } | ConnectionError::AuthFailed { .. }
        )
    }
}

/// Snapshot decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Snapshot file could not be opened or read
    #[error("Failed to read snapshot '{file}': {reason}")]
    Io { file: PathBuf, reason: String },

    /// Record at a given line is malformed
    #[error("Malformed record in '{file}' at line {line}: {reason}")]
    Malformed {
        file: PathBuf,
        line: u64,
        reason: String,
    },

    /// Live source failed mid-stream; surfaces as a connection error
    #[error("Live source '{addr}' failed: {error}")]
    Live {
        addr: String,
        #[source]
        error: ConnectionError,
    },
}

impl DecodeError {
    /// File path or node address the error came from
    pub fn source_name(&self) -> String {
        match self {
            DecodeError::Io { file, .. } | DecodeError::Malformed { file, .. } => {
                file.display().to_string()
            }
            DecodeError::Live { addr, .. } => addr.clone(),
        }
    }
}

/// Topology resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// INFO did not report a usable redis_mode
    #[error("Node '{addr}' reported unsupported deployment mode '{mode}'")]
    UnknownMode { addr: String, mode: String },

    /// A cluster member could not be used; logged, not fatal on its own
    #[error("Skipping cluster member '{member}': {reason}")]
    PartialTopology { member: String, reason: String },

    /// No node of the requested role survived enumeration
    #[error("No eligible {role} node available")]
    NoEligibleNode { role: String },
}

/// Delete pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Pipelined delete failed; earlier batches stay deleted
    #[error("Delete batch {batch} ({keys} keys) on '{addr}' failed: {reason}")]
    BatchFailed {
        addr: String,
        batch: u64,
        keys: usize,
        reason: String,
    },

    /// Reply count did not match the number of keys sent
    #[error("Delete batch {batch} on '{addr}' returned {got} replies for {expected} keys")]
    ReplyMismatch {
        addr: String,
        batch: u64,
        expected: usize,
        got: usize,
    },
}

/// A live source failing mid-scan is a connection failure, not a bad
/// snapshot, so it never takes the decode path.
impl From<DecodeError> for ScopeError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Live { error, .. } => ScopeError::Connection(error),
            other => ScopeError::Decode(other),
        }
    }
}

/// Result type alias for ScopeError
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Result type alias for ConnectionError
pub type LiveResult<T> = std::result::Result<T, ConnectionError>;
