//! Crate-wide error types.
//!
//! Per the propagation policy: almost everything is locally recoverable and
//! simply logged, then retried on the next event. Only IPC-socket creation
//! at startup is fatal (see [`crate::ipc`]).

use std::io;
use thiserror::Error;

/// Errors produced by the homenet control core.
#[derive(Debug, Error)]
pub enum Error {
    /// A field or wire record was malformed. Carries a human-readable
    /// description; the caller is expected to log and skip the offending
    /// field/record rather than abort.
    #[error("parse error: {0}")]
    Parse(String),

    /// A protocol-level invariant was violated (e.g. a TLV container longer
    /// than its parent, or an out-of-range prefix length).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The configured routing backend script could not be run, or exited
    /// abnormally. Non-fatal: the daemon falls back to pure BFS routing.
    #[error("routing backend error: {0}")]
    Backend(String),

    /// An underlying I/O operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
