//! Error types for the sync layer.
//!
//! Nothing in here is fatal to the process: a `FrameError` costs one
//! connection, a `TransportError` becomes a status string, and delta
//! drift is not an error at all.

use thiserror::Error;

use crate::registry::ConnectionId;

/// Malformed input on a framed byte stream.
///
/// The owning connection is unusable once one of these is returned.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Header block has no `Content-Length` entry.
    #[error("frame header is missing Content-Length")]
    MissingContentLength,

    /// `Content-Length` is present but not a non-negative decimal integer.
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    /// Declared body length exceeds the configured maximum.
    #[error("frame body of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared body length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No header delimiter within the configured header budget.
    #[error("frame header exceeds {max} bytes without a delimiter")]
    HeaderTooLarge {
        /// Configured maximum.
        max: usize,
    },

    /// Body could not be decoded as a delta.
    #[error("invalid frame body: {0}")]
    InvalidBody(String),

    /// Underlying stream error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Socket-level failures (connect, listen, write).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the hub failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address we tried to reach.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Binding the listening socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Address we tried to bind.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// The connection's writer is gone.
    #[error("write to connection {0} failed: connection closed")]
    Write(ConnectionId),

    /// Dialing took longer than the configured timeout.
    #[error("timed out connecting to {0}")]
    Timeout(String),
}

/// Invalid role or address input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown mode {0:?} (expected \"client\" or \"server\")")]
    UnknownRole(String),

    #[error("malformed address {0:?} (expected host:port)")]
    MalformedAddress(String),

    #[error("invalid port {0:?} (expected 1-65535)")]
    InvalidPort(String),
}

/// Top-level errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation not allowed in the engine's current phase.
    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        /// Phase the engine was in.
        phase: crate::engine::Phase,
        /// What was attempted.
        operation: &'static str,
    },

    /// The node was shut down; it cannot listen or connect again.
    #[error("node has been shut down")]
    Shutdown,
}
