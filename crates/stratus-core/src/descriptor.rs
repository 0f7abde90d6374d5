//! Transfer descriptors
//!
//! A [`TransferOp`] names what to move; resolving it against the local
//! filesystem or the remote store yields a [`TransferDescriptor`] that is
//! immutable for the life of a run and is snapshotted into the checkpoint.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratus_files::hasher::{fingerprint, identity_digest};
use stratus_transport::{ObjectMeta, ObjectRef, ObjectStore};
use tracing::debug;

use crate::cancel::CancelHandle;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::retry::with_retry;

/// Suffix of the file a download is written into before verification
pub const STAGING_SUFFIX: &str = ".stratus-part";

/// Operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Local file to remote object
    Upload,
    /// Remote object to local file
    Download,
    /// Remote object to remote object, server-side
    Copy,
}

impl TransferKind {
    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to transfer, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransferOp {
    /// Upload `source` into `target`
    Upload {
        /// Local file
        source: PathBuf,
        /// Destination object
        target: ObjectRef,
    },
    /// Download `source` into `target`
    Download {
        /// Remote object
        source: ObjectRef,
        /// Destination file
        target: PathBuf,
    },
    /// Copy `source` into `target` without moving bytes through the client
    Copy {
        /// Source object
        source: ObjectRef,
        /// Destination object
        target: ObjectRef,
    },
}

impl TransferOp {
    /// Operation kind
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Upload { .. } => TransferKind::Upload,
            Self::Download { .. } => TransferKind::Download,
            Self::Copy { .. } => TransferKind::Copy,
        }
    }

    /// Object the multipart session is opened on (upload and copy), or the
    /// object read from (download)
    pub fn remote_object(&self) -> &ObjectRef {
        match self {
            Self::Upload { target, .. } | Self::Copy { target, .. } => target,
            Self::Download { source, .. } => source,
        }
    }

    /// Local file read or written, if any
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Upload { source, .. } => Some(source),
            Self::Download { target, .. } => Some(target),
            Self::Copy { .. } => None,
        }
    }
}

/// Fully resolved, immutable description of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    /// What is being moved, with the local path made absolute
    pub op: TransferOp,

    /// Payload size in bytes
    pub total_size: u64,

    /// Bytes per part
    pub part_size: u64,

    /// Maximum parts in flight
    pub thread_count: usize,

    /// Checkpoint directory, `None` when resume is disabled
    pub checkpoint_dir: Option<PathBuf>,

    /// Byte throughput cap
    pub traffic_limit_bytes_per_sec: Option<u64>,

    /// Source modification time, seconds since the Unix epoch
    pub source_mod_time: u64,

    /// Digest identifying the source version (local file identity, or remote
    /// ETag for download and copy)
    pub source_identity_hash: String,

    /// Whole-object CRC64 reported by the service for a remote source
    pub remote_crc64: Option<u64>,
}

impl TransferDescriptor {
    /// Resolve `op` into a descriptor.
    ///
    /// Uploads stat the local file; downloads and copies `head` the source
    /// object (with retry). Part size and count are checked against the
    /// configured service limits.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for a missing or unusable local
    /// source or out-of-bounds part planning, and a transport-classified
    /// error if the remote source cannot be inspected.
    pub async fn resolve<S>(
        op: TransferOp,
        config: &TransferConfig,
        store: &S,
        cancel: &CancelHandle,
    ) -> Result<Self>
    where
        S: ObjectStore + ?Sized,
    {
        let (op, total_size, source_mod_time, source_identity_hash, remote_crc64) = match op {
            TransferOp::Upload { source, target } => {
                let source = absolute(&source)?;
                let fp = fingerprint(&source).await.map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => TransferError::Validation(Cow::Owned(format!(
                        "source file {} not found",
                        source.display()
                    ))),
                    io::ErrorKind::InvalidInput => {
                        TransferError::Validation(Cow::Owned(e.to_string()))
                    }
                    _ => TransferError::Io(e),
                })?;
                (
                    TransferOp::Upload { source, target },
                    fp.size,
                    fp.modified,
                    fp.identity,
                    None,
                )
            }
            TransferOp::Download { source, target } => {
                let target = absolute(&target)?;
                if tokio::fs::metadata(&target)
                    .await
                    .is_ok_and(|meta| meta.is_dir())
                {
                    return Err(TransferError::Validation(Cow::Owned(format!(
                        "download target {} is a directory",
                        target.display()
                    ))));
                }
                let meta = head_source(store, &source, config, cancel).await?;
                let identity = remote_identity(&source, &meta);
                (
                    TransferOp::Download { source, target },
                    meta.size,
                    meta.last_modified,
                    identity,
                    meta.crc64,
                )
            }
            TransferOp::Copy { source, target } => {
                if source == target {
                    return Err(TransferError::Validation(Cow::Borrowed(
                        "copy source and target are the same object",
                    )));
                }
                let meta = head_source(store, &source, config, cancel).await?;
                let identity = remote_identity(&source, &meta);
                (
                    TransferOp::Copy { source, target },
                    meta.size,
                    meta.last_modified,
                    identity,
                    meta.crc64,
                )
            }
        };

        config
            .planner()
            .validate(total_size)
            .map_err(|e| TransferError::Validation(Cow::Owned(e.to_string())))?;

        Ok(Self {
            op,
            total_size,
            part_size: config.part_size,
            thread_count: config.thread_count,
            checkpoint_dir: config.checkpoint_dir.clone(),
            traffic_limit_bytes_per_sec: config.traffic_limit_bytes_per_sec,
            source_mod_time,
            source_identity_hash,
            remote_crc64,
        })
    }

    /// Operation kind
    pub fn kind(&self) -> TransferKind {
        self.op.kind()
    }

    /// Digest naming this transfer's checkpoint file.
    ///
    /// Depends only on the operation kind and its endpoints, so a resumed run
    /// finds the checkpoint even if the source has since changed.
    pub fn checkpoint_key(&self) -> String {
        let local = self
            .op
            .local_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (source, target) = match &self.op {
            TransferOp::Upload { target, .. } => (String::new(), target.to_string()),
            TransferOp::Download { source, .. } => (source.to_string(), String::new()),
            TransferOp::Copy { source, target } => (source.to_string(), target.to_string()),
        };
        identity_digest(&[
            self.kind().as_str().as_bytes(),
            local.as_bytes(),
            source.as_bytes(),
            target.as_bytes(),
        ])
    }

    /// File a download is written into until it verifies
    pub fn staging_path(&self) -> Option<PathBuf> {
        match &self.op {
            TransferOp::Download { target, .. } => Some(staging_path_for(target)),
            _ => None,
        }
    }
}

/// `<target>.stratus-part`
pub fn staging_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::Validation(Cow::Borrowed("empty local path")));
    }
    Ok(std::path::absolute(path)?)
}

fn remote_identity(object: &ObjectRef, meta: &ObjectMeta) -> String {
    identity_digest(&[
        object.bucket.as_bytes(),
        object.key.as_bytes(),
        meta.etag.as_bytes(),
        &meta.size.to_le_bytes(),
    ])
}

async fn head_source<S>(
    store: &S,
    source: &ObjectRef,
    config: &TransferConfig,
    cancel: &CancelHandle,
) -> Result<ObjectMeta>
where
    S: ObjectStore + ?Sized,
{
    let (meta, _) = with_retry(&config.retry, cancel, "head", move |_| async move {
        Ok(store.head_object(source).await?)
    })
    .await
    .map_err(|(e, attempts)| {
        TransferError::from_failure(format!("head {source}"), e, attempts, None)
    })?;
    debug!(object = %source, size = meta.size, etag = %meta.etag, "resolved remote source");
    Ok(meta)
}
