//! Error types for TLS sessions
//!
//! Every failure surfaces synchronously from the call that triggered it.
//! Nothing in this crate retries on its own.

use std::fmt;
use std::io;

/// Failure reported by the TLS engine.
///
/// `code` is always negative. Engines that report positive status values
/// negate them before building the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    /// Generic internal failure
    pub const INTERNAL: i32 = -59;
    /// The peer closed the transport mid-operation or a send made no progress
    pub const PREMATURE_TERMINATION: i32 = -110;
    /// The handshake did not complete within its timeout
    pub const TIMED_OUT: i32 = -319;
    /// An operation was issued before the session was ready for it
    pub const INVALID_REQUEST: i32 = -50;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        let code = if code < 0 { code } else { -code.max(1) };
        EngineError {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for EngineError {}

/// TLS session errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("engine version mismatch: required {required}, found {found}")]
    VersionMismatch { required: String, found: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("TLS engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TlsError> for io::Error {
    fn from(err: TlsError) -> Self {
        match err {
            TlsError::Io(e) => e,
            TlsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;
