//! # STRATUS Core
//!
//! Resumable, checkpointed, concurrent multipart transfers against an
//! object-storage service.
//!
//! This crate provides:
//! - [`TransferManager`]: upload, download and server-side copy runs driven
//!   through a bounded worker pool
//! - [`CheckpointStore`]: durable, versioned, atomically rewritten transfer
//!   state so an interrupted run resumes where it stopped
//! - [`RateLimiter`]: token-bucket throughput cap shared by all workers
//! - Whole-object CRC64 verification by combining part checksums
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratus_core::{TransferConfig, TransferManager};
//! use stratus_transport::{ObjectRef, ObjectStore};
//!
//! async fn backup<S: ObjectStore + 'static>(store: Arc<S>) -> stratus_core::Result<()> {
//!     let config = TransferConfig {
//!         checkpoint_dir: Some("/var/lib/stratus".into()),
//!         ..TransferConfig::default()
//!     };
//!     let manager = TransferManager::new(store, config);
//!     let summary = manager
//!         .upload("/data/archive.tar", ObjectRef::new("backups", "archive.tar"))
//!         .await?;
//!     println!("{} parts, crc64 {:?}", summary.parts_total, summary.crc64);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;
pub mod retry;

pub use cancel::CancelHandle;
pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointStore, PartRecord};
pub use config::{RetryConfig, TransferConfig};
pub use descriptor::{TransferDescriptor, TransferKind, TransferOp};
pub use error::{CheckpointError, PartError, Result, TransferError};
pub use orchestrator::TransferManager;
pub use progress::{ProgressListener, RunSummary, TransferPhase, TransferProgress};
pub use rate_limiter::{RateLimitMetrics, RateLimiter};
