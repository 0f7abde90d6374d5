//! # STRATUS Transport
//!
//! The seam between the transfer engine and an object-storage service.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait: multipart session calls, ranged reads and
//!   object metadata lookups
//! - Value types exchanged across that seam (object references, byte ranges,
//!   part receipts)
//! - [`TransportError`] and its [`FailureClass`] classification, which the
//!   orchestrator uses to decide between retry, restart and abort
//!
//! Request signing, XML marshaling, TLS and connection pooling live behind an
//! `ObjectStore` implementation and are not part of this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod types;

pub use error::{FailureClass, TransportError, TransportResult};
pub use store::ObjectStore;
pub use types::{ByteRange, CompleteOutput, CompletedPart, ObjectMeta, ObjectRef, PartReceipt};

/// Service error code reported when a multipart session no longer exists.
pub const NO_SUCH_UPLOAD: &str = "NoSuchUpload";
