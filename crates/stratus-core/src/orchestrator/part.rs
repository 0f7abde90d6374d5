//! Part workers
//!
//! One spawned task per in-flight part. A worker acquires rate-limiter tokens,
//! moves its byte range through the store, checks the part checksum when the
//! service reports one, and returns a [`PartReport`] to the orchestrator. It
//! never touches the checkpoint.

use std::sync::Arc;

use stratus_files::crc64;
use stratus_files::{PartReader, PartWriter};
use stratus_transport::{ByteRange, ObjectRef, ObjectStore};
use tracing::{debug, trace};

use crate::cancel::CancelHandle;
use crate::config::RetryConfig;
use crate::error::PartError;
use crate::rate_limiter::RateLimiter;
use crate::retry::with_retry;

/// Lifecycle of a part within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// Orchestrator-owned view of one part
#[derive(Debug, Clone)]
pub(crate) struct Part {
    pub number: u32,
    pub range: ByteRange,
    pub status: PartStatus,
    pub attempts: u32,
}

impl Part {
    pub fn job(&self) -> PartJob {
        PartJob {
            number: self.number,
            range: self.range,
        }
    }
}

/// Work item handed to a worker
#[derive(Debug, Clone, Copy)]
pub(crate) struct PartJob {
    pub number: u32,
    pub range: ByteRange,
}

/// What a successful part produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartOutcome {
    pub etag: Option<String>,
    pub crc64: Option<u64>,
}

/// Worker result sent back to the orchestrator
#[derive(Debug)]
pub(crate) struct PartReport {
    pub job: PartJob,
    pub attempts: u32,
    pub result: Result<PartOutcome, PartError>,
}

/// Per-kind resources a worker needs
#[derive(Debug)]
pub(crate) enum PartIo {
    Upload {
        reader: PartReader,
        upload_id: String,
    },
    Download {
        writer: PartWriter,
    },
    Copy {
        source: ObjectRef,
        upload_id: String,
    },
}

/// Shared, read-only state of every worker in a run
pub(crate) struct PartContext<S: ?Sized> {
    pub store: Arc<S>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryConfig,
    pub cancel: CancelHandle,
    /// Session object for upload and copy, source object for download
    pub object: ObjectRef,
    pub io: PartIo,
}

/// Run one part to completion or final failure
pub(crate) async fn run_part<S>(ctx: Arc<PartContext<S>>, job: PartJob) -> PartReport
where
    S: ObjectStore + ?Sized,
{
    let label = format!("part {}", job.number);
    let ctx: &PartContext<S> = &ctx;

    match with_retry(&ctx.retry, &ctx.cancel, &label, move |attempt| {
        trace!(part = job.number, attempt, "part attempt");
        attempt_part(ctx, job)
    })
    .await
    {
        Ok((outcome, attempts)) => {
            debug!(part = job.number, bytes = job.range.len, attempts, "part done");
            PartReport {
                job,
                attempts,
                result: Ok(outcome),
            }
        }
        Err((e, attempts)) => PartReport {
            job,
            attempts,
            result: Err(e),
        },
    }
}

async fn attempt_part<S>(ctx: &PartContext<S>, job: PartJob) -> Result<PartOutcome, PartError>
where
    S: ObjectStore + ?Sized,
{
    match &ctx.io {
        PartIo::Upload { reader, upload_id } => {
            ctx.limiter.acquire(job.range.len).await;
            let body = reader.read_range(job.range).await?;
            let crc = crc64::calc(0, &body);

            let receipt = ctx
                .store
                .upload_part(&ctx.object, upload_id, job.number, body)
                .await?;
            check_part_crc(job.number, crc, receipt.crc64)?;

            Ok(PartOutcome {
                etag: Some(receipt.etag),
                crc64: Some(crc),
            })
        }
        PartIo::Download { writer } => {
            ctx.limiter.acquire(job.range.len).await;
            let data = if job.range.is_empty() {
                Vec::new()
            } else {
                ctx.store.get_object_range(&ctx.object, job.range).await?
            };
            if data.len() as u64 != job.range.len {
                return Err(PartError::ShortRead {
                    expected: job.range.len,
                    actual: data.len() as u64,
                });
            }

            let crc = crc64::calc(0, &data);
            writer.write_at(job.range.offset, data).await?;

            Ok(PartOutcome {
                etag: None,
                crc64: Some(crc),
            })
        }
        PartIo::Copy { source, upload_id } => {
            // Server-side: no bytes cross the client, so no tokens are taken.
            let receipt = ctx
                .store
                .upload_part_copy(&ctx.object, upload_id, job.number, source, job.range)
                .await?;

            Ok(PartOutcome {
                etag: Some(receipt.etag),
                crc64: receipt.crc64,
            })
        }
    }
}

fn check_part_crc(part: u32, client: u64, service: Option<u64>) -> Result<(), PartError> {
    match service {
        Some(service) if service != client => Err(PartError::ChecksumMismatch {
            part,
            client,
            service,
        }),
        _ => Ok(()),
    }
}
