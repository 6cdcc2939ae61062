//! Error types for LanShare.
//!
//! This module provides a unified error type for all LanShare operations,
//! with specific error variants for different failure modes.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for LanShare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A coarse classification of an [`Error`], used by callers deciding
/// whether to retry, surface to the user, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The underlying socket or connection failed.
    NetworkFailure,
    /// A peer rejected a pairing or reconnect attempt.
    HandshakeRejected,
    /// A frame violated the wire format.
    MalformedFrame,
    /// Persisted state was missing, unreadable, or inconsistent.
    StateCorruption,
    /// A write failed because of disk space or another I/O failure.
    IoFailure,
    /// The peer is not in the trust store.
    NotTrusted,
    /// An operation exceeded its deadline.
    Timeout,
    /// The device identity file could not be created or read.
    IdentityUnavailable,
    /// The configuration file was missing, malformed, or invalid.
    ConfigError,
}

/// The main error type for LanShare.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying socket or connection failed.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The peer at the given address closed or reset the connection.
    #[error("connection lost to {0}")]
    ConnectionLost(SocketAddr),

    /// A pairing or reconnect attempt was rejected by the peer.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// A frame header or payload violated the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame's payload exceeded the configured maximum size.
    #[error("frame payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// The size of the offending payload, in bytes.
        size: u32,
        /// The configured maximum payload size, in bytes.
        limit: u32,
    },

    /// Persisted transfer or trust state was missing or inconsistent.
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// A chunk's recorded hash does not match its bytes on disk.
    #[error("checksum mismatch for chunk {chunk} of transfer '{file_hash}'")]
    ChecksumMismatch {
        /// The file hash identifying the transfer.
        file_hash: String,
        /// The chunk index that failed verification.
        chunk: u64,
    },

    /// The destination disk does not have enough free space.
    #[error("insufficient disk space: need {needed} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Bytes needed to complete the write.
        needed: u64,
        /// Bytes currently available.
        available: u64,
    },

    /// A file or directory referenced by a transfer does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A path could not be used (outside the share root, not writable, etc).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The peer is not present in the trust store.
    #[error("device '{0}' is not trusted")]
    NotTrusted(String),

    /// A pair code did not match the host's expectation.
    #[error("pair code rejected")]
    PairCodeRejected,

    /// A pair code string was not well-formed.
    #[error("invalid pair code format: {0}")]
    InvalidCodeFormat(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// The heartbeat supervisor saw no traffic within the liveness window.
    #[error("heartbeat timeout: no traffic for {0} seconds")]
    HeartbeatTimeout(u64),

    /// The reconnect supervisor exhausted its retry budget.
    #[error("reconnect failed after {0} attempts")]
    ReconnectExhausted(u32),

    /// The device identity file could not be created, read, or parsed.
    #[error("device identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The configuration file was missing, malformed, or held an invalid value.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A transfer was cancelled by its owner.
    #[error("transfer cancelled")]
    TransferCancelled,

    /// An operation was attempted on a session that was already closed.
    #[error("session is closed")]
    SessionClosed,

    /// I/O error not otherwise classified above.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON payload failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A TOML config document failed to parse.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Internal invariant violation; should not happen.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the coarse [`ErrorKind`] of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkFailure(_) | Self::ConnectionLost(_) => ErrorKind::NetworkFailure,
            Self::HandshakeRejected(_) | Self::PairCodeRejected | Self::InvalidCodeFormat(_) => {
                ErrorKind::HandshakeRejected
            }
            Self::MalformedFrame(_) | Self::PayloadTooLarge { .. } => ErrorKind::MalformedFrame,
            Self::StateCorruption(_) | Self::ChecksumMismatch { .. } => ErrorKind::StateCorruption,
            Self::InsufficientSpace { .. }
            | Self::FileNotFound(_)
            | Self::InvalidPath(_)
            | Self::Io(_) => ErrorKind::IoFailure,
            Self::NotTrusted(_) => ErrorKind::NotTrusted,
            Self::Timeout(_) | Self::HeartbeatTimeout(_) | Self::ReconnectExhausted(_) => {
                ErrorKind::Timeout
            }
            Self::IdentityUnavailable(_) => ErrorKind::IdentityUnavailable,
            Self::ConfigError(_) | Self::ConfigParse(_) => ErrorKind::ConfigError,
            Self::TransferCancelled | Self::SessionClosed | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::StateCorruption
            }
        }
    }

    /// Returns whether the failed operation is worth retrying as-is.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure(_)
                | Self::ConnectionLost(_)
                | Self::Timeout(_)
                | Self::HeartbeatTimeout(_)
                | Self::ChecksumMismatch { .. }
        )
    }
}
