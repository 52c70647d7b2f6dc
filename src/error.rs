use std::io;

use thiserror::Error;

use crate::types::DialOutcome;

/// Classifies dial errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialErrorKind {
    /// Connection to the remote host failed
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// I/O error during data transfer
    Io,
    /// Input validation failed (bad host, missing port, etc.)
    InvalidInput,
    /// The remote end answered with a forged response or a poisoned address
    Hijacked,
}

/// Detour engine error types
#[derive(Error, Debug)]
pub enum DetourError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Dial error: {message}")]
    DialError {
        kind: DialErrorKind,
        message: String,
    },

    /// The direct attempt failed after a request that cannot be replayed had
    /// already been sent. The host is still learned.
    #[error("Direct connection to {host} failed ({outcome}) and the request cannot be retried")]
    NotRetryable {
        host: String,
        outcome: DialOutcome,
        #[source]
        source: io::Error,
    },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DetourError {
    /// Build a dial error of the given kind.
    pub fn dial(kind: DialErrorKind, message: impl Into<String>) -> Self {
        DetourError::DialError {
            kind,
            message: message.into(),
        }
    }

    /// The dial error kind, if this is a dial error.
    pub fn dial_kind(&self) -> Option<DialErrorKind> {
        match self {
            DetourError::DialError { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<DetourError> for io::Error {
    fn from(err: DetourError) -> Self {
        let kind = match &err {
            DetourError::IoError(e) => e.kind(),
            DetourError::InvalidAddress(_) | DetourError::ConfigError(_) => {
                io::ErrorKind::InvalidInput
            }
            DetourError::DialError { kind, .. } => match kind {
                DialErrorKind::ConnectionFailed => io::ErrorKind::ConnectionRefused,
                DialErrorKind::Timeout => io::ErrorKind::TimedOut,
                DialErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
                DialErrorKind::Io | DialErrorKind::Hijacked => io::ErrorKind::Other,
            },
            DetourError::NotRetryable { source, .. } => source.kind(),
            DetourError::JsonError(_) => io::ErrorKind::InvalidData,
        };
        match err {
            DetourError::IoError(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetourError>;
