//! Error types for STRATUS transfers
//!
//! A run surfaces exactly one [`TransferError`]. Errors are categorized so
//! callers can tell "failed to transfer" from "transferred but wrong":
//!
//! - **Validation**: bad descriptor or configuration, raised before any network
//!   call or checkpoint write
//! - **Transient**: a part (or session call) kept failing with retryable errors
//!   until the attempt budget ran out; the checkpoint is kept for a later resume
//! - **SessionInvalid**: the remote multipart session disappeared
//! - **Integrity**: every call succeeded but the final CRC64 did not match
//! - **Fatal**: non-retryable transport failure (auth, not-found, permission)
//!
//! # Example
//!
//! ```no_run
//! use stratus_core::TransferError;
//!
//! fn report(err: &TransferError) {
//!     if err.is_integrity() {
//!         eprintln!("object arrived but is corrupt: {err}");
//!     } else if err.is_transient() {
//!         eprintln!("transfer interrupted, run again to resume: {err}");
//!     } else {
//!         eprintln!("transfer failed: {err}");
//!     }
//! }
//! ```

use std::borrow::Cow;
use std::io;

use stratus_transport::{FailureClass, TransportError};
use thiserror::Error;

/// Why a single part attempt (or session call) failed
#[derive(Debug, Error)]
pub enum PartError {
    /// The remote call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading the source or writing the target failed
    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),

    /// Service and client disagree on the checksum of the bytes just moved
    #[error("part {part} checksum mismatch: client {client:#018x}, service {service:#018x}")]
    ChecksumMismatch {
        /// Part number
        part: u32,
        /// CRC64 computed locally
        client: u64,
        /// CRC64 reported by the service
        service: u64,
    },

    /// A ranged read returned the wrong number of bytes
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes requested
        expected: u64,
        /// Bytes received
        actual: u64,
    },
}

impl PartError {
    /// Classify for retry purposes
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(e) => e.class(),
            Self::Io(_) => FailureClass::Fatal,
            Self::ChecksumMismatch { .. } | Self::ShortRead { .. } => FailureClass::Transient,
        }
    }
}

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint file failed
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file exists but is not a valid checkpoint
    #[error("corrupt checkpoint: {0}")]
    Corrupt(Cow<'static, str>),

    /// Written by an incompatible version
    #[error("unsupported checkpoint version {found} (supported {min}..={max})")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Oldest readable version
        min: u32,
        /// Newest readable version
        max: u32,
    },

    /// Encoding failed
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Terminal error of a transfer run
#[derive(Debug, Error)]
pub enum TransferError {
    /// Invalid descriptor or configuration
    #[error("invalid transfer: {0}")]
    Validation(Cow<'static, str>),

    /// Retry budget exhausted on a retryable failure
    #[error("{context} failed after {attempts} attempts: {source}")]
    Transient {
        /// What was being attempted (`part 3`, `complete`, ...)
        context: String,
        /// Attempts made
        attempts: u32,
        /// Last failure
        #[source]
        source: PartError,
    },

    /// The remote multipart session no longer exists
    #[error("multipart session {upload_id} is gone: {source}")]
    SessionInvalid {
        /// Session id
        upload_id: String,
        /// Failure that revealed it
        #[source]
        source: PartError,
    },

    /// Final checksum mismatch
    #[error("integrity check failed: expected crc64 {expected:#018x}, got {actual:#018x}")]
    Integrity {
        /// Checksum of the source
        expected: u64,
        /// Checksum of what was transferred
        actual: u64,
    },

    /// Non-retryable failure
    #[error("{context} failed: {source}")]
    Fatal {
        /// What was being attempted
        context: String,
        /// Underlying failure
        #[source]
        source: PartError,
    },

    /// The run was cancelled; the checkpoint is left in place
    #[error("transfer cancelled")]
    Cancelled,

    /// Checkpoint could not be persisted
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Local file I/O outside of part operations
    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("configuration error: {0}")]
    Config(Cow<'static, str>),

    /// A worker task panicked
    #[error("worker task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Map a classified failure to the run-level error
    pub(crate) fn from_failure(
        context: impl Into<String>,
        source: PartError,
        attempts: u32,
        upload_id: Option<&str>,
    ) -> Self {
        match source.class() {
            FailureClass::Transient => Self::Transient {
                context: context.into(),
                attempts,
                source,
            },
            FailureClass::SessionInvalid => Self::SessionInvalid {
                upload_id: upload_id.unwrap_or_default().to_string(),
                source,
            },
            FailureClass::Fatal => Self::Fatal {
                context: context.into(),
                source,
            },
        }
    }

    /// Returns true if running the same transfer again may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Cancelled | Self::SessionInvalid { .. }
        )
    }

    /// Returns true for a final checksum mismatch
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Returns true if the remote session was found missing
    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. })
    }

    /// Returns true for descriptor/configuration problems
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
