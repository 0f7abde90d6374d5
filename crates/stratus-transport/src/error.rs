//! Transport errors and their classification.

use std::io;

/// How the orchestrator should react to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Temporary failure; the same call may succeed on retry
    Transient,
    /// The multipart session is gone on the service side
    SessionInvalid,
    /// Will not succeed without intervention (auth, not-found, bad request)
    Fatal,
}

/// Errors returned by an [`ObjectStore`](crate::ObjectStore) implementation
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the transport's deadline
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established or was reset
    #[error("connection failed: {0}")]
    Connection(String),

    /// The service answered with a non-success status
    #[error("service returned {status} {code}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Service error code (e.g. `NoSuchUpload`, `AccessDenied`)
        code: String,
        /// Human-readable message
        message: String,
    },

    /// Local I/O error while producing or consuming a body
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport-specific error
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Build a status error from its parts
    pub fn status(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify this error for retry purposes
    ///
    /// - Timeouts, connection failures, 408, 429 and 5xx are transient
    /// - 404 `NoSuchUpload` means the session itself is gone
    /// - Everything else (401, 403, other 404s, 400) is fatal
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) => FailureClass::Transient,
            Self::Status { status, code, .. } => {
                if *status == 404 && code == crate::NO_SUCH_UPLOAD {
                    FailureClass::SessionInvalid
                } else if *status == 408 || *status == 429 || *status >= 500 {
                    FailureClass::Transient
                } else {
                    FailureClass::Fatal
                }
            }
            Self::Io(e) => match e.kind() {
                io::ErrorKind::Interrupted
                | io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => FailureClass::Transient,
                _ => FailureClass::Fatal,
            },
            Self::Other(_) => FailureClass::Fatal,
        }
    }

    /// Returns true if the call may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
