//! Transfer orchestration
//!
//! [`TransferManager`] drives one resumable run end to end:
//!
//! ```text
//! Init ──> SessionEstablish ──> PartsInFlight ──> Completing ──> Verifying ──> Done
//!   │             │                   │                │              │
//!   └─────────────┴───────────────────┴────────────────┴──────────────┴──> Failed | Aborted
//! ```
//!
//! - **Init**: resolve the descriptor, load the checkpoint and discard it if
//!   the source, target or layout changed
//! - **SessionEstablish**: open a multipart session (upload, copy) and record
//!   it, or reuse the one a valid checkpoint names
//! - **PartsInFlight**: feed every pending part to at most `thread_count`
//!   workers; each completion is persisted before the next is handled
//! - **Completing**: finalize with parts in ascending order
//! - **Verifying**: compare the combined part CRC64 and the service CRC64
//!   against the source checksum
//!
//! The checkpoint is written only from the orchestrator task. A failed or
//! cancelled run leaves it on disk so the same call resumes later, except
//! when the session itself is gone, when nothing had completed before a
//! fatal error, or when the result failed verification.

mod part;
mod verify;

use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use stratus_files::hasher::crc64_file;
use stratus_files::{PartReader, PartWriter};
use stratus_transport::{ObjectRef, ObjectStore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelHandle;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::TransferConfig;
use crate::descriptor::{TransferDescriptor, TransferKind, TransferOp};
use crate::error::{CheckpointError, Result, TransferError};
use crate::progress::{ProgressListener, RunSummary, TransferPhase, TransferProgress};
use crate::rate_limiter::RateLimiter;
use crate::retry::with_retry;

use part::{Part, PartContext, PartIo, PartStatus, run_part};

/// Runs uploads, downloads and server-side copies against one store
///
/// The rate limiter is shared by every run of the manager, so concurrent runs
/// split the configured throughput between them.
pub struct TransferManager<S: ObjectStore + ?Sized> {
    store: Arc<S>,
    config: TransferConfig,
    limiter: Arc<RateLimiter>,
    listener: Option<Arc<dyn ProgressListener>>,
}

/// Checkpoint location of a run, when resume is enabled
struct Persistence {
    store: CheckpointStore,
    path: PathBuf,
}

/// What a run has established so far, for cleanup on failure
#[derive(Default)]
struct RunState {
    checkpoint: Option<Checkpoint>,
}

impl<S> TransferManager<S>
where
    S: ObjectStore + ?Sized + 'static,
{
    /// Create a manager
    pub fn new(store: Arc<S>, config: TransferConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.traffic_limit_bytes_per_sec));
        Self {
            store,
            config,
            limiter,
            listener: None,
        }
    }

    /// Report progress to `listener`
    #[must_use]
    pub fn with_progress(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Shared limiter; `set_rate` on it takes effect mid-run
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Upload a local file
    ///
    /// # Errors
    ///
    /// See [`TransferManager::run`].
    pub async fn upload(&self, source: impl Into<PathBuf>, target: ObjectRef) -> Result<RunSummary> {
        let op = TransferOp::Upload {
            source: source.into(),
            target,
        };
        self.run(op, &CancelHandle::new()).await
    }

    /// Download an object into a local file
    ///
    /// # Errors
    ///
    /// See [`TransferManager::run`].
    pub async fn download(&self, source: ObjectRef, target: impl Into<PathBuf>) -> Result<RunSummary> {
        let op = TransferOp::Download {
            source,
            target: target.into(),
        };
        self.run(op, &CancelHandle::new()).await
    }

    /// Copy an object server-side
    ///
    /// # Errors
    ///
    /// See [`TransferManager::run`].
    pub async fn copy(&self, source: ObjectRef, target: ObjectRef) -> Result<RunSummary> {
        self.run(TransferOp::Copy { source, target }, &CancelHandle::new())
            .await
    }

    /// Execute one resumable run.
    ///
    /// If the remote session turns out to be gone, the checkpoint is dropped
    /// and the run starts over once; a second loss is reported as fatal.
    ///
    /// # Errors
    ///
    /// Returns exactly one [`TransferError`]: validation problems before any
    /// remote call, exhausted retries, fatal transport errors, integrity
    /// mismatches, cancellation, or checkpoint I/O failures.
    pub async fn run(&self, op: TransferOp, cancel: &CancelHandle) -> Result<RunSummary> {
        let started = Instant::now();
        let kind = op.kind();

        let outcome: Result<RunSummary> = async {
            self.config.validate()?;
            let descriptor =
                TransferDescriptor::resolve(op, &self.config, &*self.store, cancel).await?;
            info!(
                kind = %kind,
                object = %descriptor.op.remote_object(),
                bytes = descriptor.total_size,
                part_size = descriptor.part_size,
                threads = descriptor.thread_count,
                "starting transfer"
            );

            let mut restarts = 0;
            loop {
                match self.run_once(&descriptor, cancel).await {
                    Err(TransferError::SessionInvalid { upload_id, source }) => {
                        if restarts > 0 {
                            return Err(TransferError::Fatal {
                                context: format!("multipart session {upload_id} lost again"),
                                source,
                            });
                        }
                        warn!(session = %upload_id, error = %source, "session gone, restarting transfer");
                        restarts += 1;
                    }
                    Ok(mut summary) => {
                        summary.session_restarts = restarts;
                        return Ok(summary);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        .await;

        match outcome {
            Ok(mut summary) => {
                summary.elapsed = started.elapsed();
                info!(
                    kind = %kind,
                    bytes = summary.total_bytes,
                    transferred = summary.parts_transferred,
                    resumed = summary.parts_resumed,
                    retries = summary.retries,
                    verified = summary.verified,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "transfer complete"
                );
                Ok(summary)
            }
            Err(e) => {
                let phase = if matches!(e, TransferError::Cancelled) {
                    info!(kind = %kind, "transfer cancelled");
                    TransferPhase::Aborted
                } else {
                    error!(kind = %kind, error = %e, "transfer failed");
                    TransferPhase::Failed
                };
                self.emit(kind, phase, None);
                Err(e)
            }
        }
    }

    async fn run_once(
        &self,
        descriptor: &TransferDescriptor,
        cancel: &CancelHandle,
    ) -> Result<RunSummary> {
        let persistence = descriptor.checkpoint_dir.as_ref().map(|dir| {
            let store = CheckpointStore::new(dir);
            let path = store.path_for(descriptor);
            Persistence { store, path }
        });

        let mut state = RunState::default();
        let result = self
            .execute(descriptor, cancel, persistence.as_ref(), &mut state)
            .await;
        if let Err(e) = &result {
            self.cleanup_failed(e, descriptor, persistence.as_ref(), &state)
                .await;
        }
        result
    }

    async fn execute(
        &self,
        descriptor: &TransferDescriptor,
        cancel: &CancelHandle,
        persistence: Option<&Persistence>,
        state: &mut RunState,
    ) -> Result<RunSummary> {
        let kind = descriptor.kind();
        let planned = self
            .config
            .planner()
            .plan(descriptor.total_size)
            .map_err(|e| TransferError::Validation(Cow::Owned(e.to_string())))?;

        // Init
        self.emit(kind, TransferPhase::Init, None);
        let resumed = match persistence {
            Some(p) => self.load_checkpoint(descriptor, p).await?,
            None => None,
        };
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        // SessionEstablish
        self.emit(kind, TransferPhase::SessionEstablish, None);
        let is_resume = resumed.is_some();
        let mut checkpoint = match resumed {
            Some(mut checkpoint) => {
                info!(
                    done = checkpoint.done_count(),
                    parts = checkpoint.parts.len(),
                    session = checkpoint.upload_id.as_deref().unwrap_or("-"),
                    "resuming from checkpoint"
                );
                if checkpoint.expected_crc64.is_none() {
                    checkpoint.expected_crc64 = self.expected_crc64(descriptor).await?;
                }
                checkpoint
            }
            None => {
                let expected = self.expected_crc64(descriptor).await?;
                let upload_id = match kind {
                    TransferKind::Upload | TransferKind::Copy => {
                        Some(self.open_session(descriptor, cancel).await?)
                    }
                    TransferKind::Download => None,
                };
                Checkpoint::new(descriptor.clone(), upload_id, expected)
            }
        };
        if let Some(p) = persistence {
            p.store.save(&p.path, &mut checkpoint).await?;
        }
        state.checkpoint = Some(checkpoint);

        let io = self.part_io(descriptor, state, is_resume).await?;
        let ctx = Arc::new(PartContext {
            store: Arc::clone(&self.store),
            limiter: Arc::clone(&self.limiter),
            retry: self.config.retry.clone(),
            cancel: cancel.clone(),
            object: descriptor.op.remote_object().clone(),
            io,
        });
        let Some(checkpoint) = state.checkpoint.as_mut() else {
            return Err(TransferError::Validation(Cow::Borrowed("checkpoint missing")));
        };

        // PartsInFlight
        let mut parts: Vec<Part> = planned
            .iter()
            .map(|p| Part {
                number: p.number,
                range: p.range,
                status: if checkpoint.is_part_complete(p.number) {
                    PartStatus::Done
                } else {
                    PartStatus::Pending
                },
                attempts: 0,
            })
            .collect();
        let mut pending: VecDeque<usize> = parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.status == PartStatus::Pending)
            .map(|(i, _)| i)
            .collect();

        let mut summary = RunSummary::new(kind, descriptor.total_size, parts.len());
        summary.parts_resumed = checkpoint.done_count();
        summary.upload_id = checkpoint.upload_id.clone();
        self.emit(kind, TransferPhase::PartsInFlight, Some(&*checkpoint));

        let mut workers: JoinSet<part::PartReport> = JoinSet::new();
        let mut failure: Option<TransferError> = None;

        loop {
            while failure.is_none()
                && !cancel.is_cancelled()
                && workers.len() < descriptor.thread_count
            {
                let Some(index) = pending.pop_front() else {
                    break;
                };
                parts[index].status = PartStatus::InFlight;
                workers.spawn(run_part(Arc::clone(&ctx), parts[index].job()));
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            let report = match joined {
                Ok(report) => report,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    workers.abort_all();
                    if failure.is_none() {
                        failure = Some(TransferError::Join(e.to_string()));
                    }
                    continue;
                }
            };

            let number = report.job.number;
            let part = &mut parts[(number - 1) as usize];
            part.attempts += report.attempts;

            match report.result {
                Ok(outcome) => {
                    part.status = PartStatus::Done;
                    checkpoint.complete_part(number, outcome.etag, outcome.crc64);
                    if let Some(p) = persistence {
                        p.store.save(&p.path, checkpoint).await?;
                    }
                    summary.record_part(report.job.range.len, report.attempts);
                    self.emit(kind, TransferPhase::PartsInFlight, Some(&*checkpoint));
                }
                Err(e) => {
                    let err = TransferError::from_failure(
                        format!("part {number}"),
                        e,
                        report.attempts,
                        checkpoint.upload_id.as_deref(),
                    );
                    let transient = matches!(err, TransferError::Transient { .. });
                    if cancel.is_cancelled() && transient && failure.is_none() {
                        // Interrupted, not failed: stays pending for the next run.
                        part.status = PartStatus::Pending;
                        continue;
                    }
                    part.status = PartStatus::Failed;
                    error!(part = number, attempts = part.attempts, error = %err, "part failed");
                    if !transient {
                        workers.abort_all();
                    }
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if !checkpoint.is_complete() {
            return Err(TransferError::Cancelled);
        }

        // Completing
        self.emit(kind, TransferPhase::Completing, Some(&*checkpoint));
        let service_crc64 = match &ctx.io {
            PartIo::Upload { upload_id, .. } | PartIo::Copy { upload_id, .. } => {
                let parts = checkpoint.completed_parts();
                let store = &*self.store;
                let object = &ctx.object;
                let (parts, upload_id) = (parts.as_slice(), upload_id.as_str());
                let (output, _) = with_retry(&self.config.retry, cancel, "complete", move |_| async move {
                    Ok(store.complete_multipart_upload(object, upload_id, parts).await?)
                })
                .await
                .map_err(|(e, attempts)| {
                    TransferError::from_failure(
                        format!("complete {object}"),
                        e,
                        attempts,
                        Some(upload_id),
                    )
                })?;
                debug!(session = upload_id, etag = %output.etag, "session completed");
                output.crc64
            }
            PartIo::Download { writer } => {
                writer.sync().await?;
                None
            }
        };

        // Verifying
        self.emit(kind, TransferPhase::Verifying, Some(&*checkpoint));
        let verified = verify::verify(
            self.config.enable_checksum_verification,
            checkpoint.expected_crc64,
            verify::combine_parts(checkpoint),
            service_crc64,
        )?;
        summary.crc64 = verified.crc64;
        summary.verified = verified.checked;

        // Done
        if let (TransferOp::Download { target, .. }, Some(staging)) =
            (&descriptor.op, descriptor.staging_path())
        {
            tokio::fs::rename(&staging, target).await?;
        }
        if let Some(p) = persistence {
            p.store.remove(&p.path).await?;
        }
        self.emit(kind, TransferPhase::Done, Some(&*checkpoint));
        Ok(summary)
    }

    /// Load the checkpoint for `descriptor`, discarding it if it cannot resume
    async fn load_checkpoint(
        &self,
        descriptor: &TransferDescriptor,
        persistence: &Persistence,
    ) -> Result<Option<Checkpoint>> {
        let path = &persistence.path;
        let checkpoint = match persistence.store.load(path).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return Ok(None),
            Err(e @ (CheckpointError::Corrupt(_) | CheckpointError::UnsupportedVersion { .. })) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable checkpoint");
                persistence.store.remove(path).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut reason = checkpoint.mismatch(descriptor);
        if reason.is_none() {
            if let Some(staging) = descriptor.staging_path() {
                if checkpoint.done_count() > 0 && !tokio::fs::try_exists(&staging).await? {
                    reason = Some("partial download file is missing");
                }
            }
        }

        match reason {
            None => Ok(Some(checkpoint)),
            Some(reason) => {
                warn!(path = %path.display(), reason, "discarding checkpoint");
                self.abort_session(&checkpoint).await;
                persistence.store.remove(path).await?;
                Ok(None)
            }
        }
    }

    /// Checksum the final result must match
    async fn expected_crc64(&self, descriptor: &TransferDescriptor) -> Result<Option<u64>> {
        match &descriptor.op {
            TransferOp::Upload { source, .. } => {
                if !self.config.enable_checksum_verification {
                    return Ok(None);
                }
                Ok(Some(crc64_file(source.clone()).await?))
            }
            TransferOp::Download { .. } | TransferOp::Copy { .. } => Ok(descriptor.remote_crc64),
        }
    }

    async fn open_session(
        &self,
        descriptor: &TransferDescriptor,
        cancel: &CancelHandle,
    ) -> Result<String> {
        let store = &*self.store;
        let object = descriptor.op.remote_object();
        let (upload_id, _) = with_retry(&self.config.retry, cancel, "create session", move |_| async move {
            Ok(store.create_multipart_upload(object).await?)
        })
        .await
        .map_err(|(e, attempts)| {
            TransferError::from_failure(format!("create session for {object}"), e, attempts, None)
        })?;
        info!(session = %upload_id, object = %object, "multipart session opened");
        Ok(upload_id)
    }

    /// Open the per-kind resources workers share
    async fn part_io(
        &self,
        descriptor: &TransferDescriptor,
        state: &RunState,
        is_resume: bool,
    ) -> Result<PartIo> {
        let upload_id = state
            .checkpoint
            .as_ref()
            .and_then(|c| c.upload_id.clone());

        match (&descriptor.op, upload_id) {
            (TransferOp::Upload { source, .. }, Some(upload_id)) => {
                let reader = PartReader::open(source).await?;
                if reader.size() != descriptor.total_size {
                    return Err(TransferError::Validation(Cow::Owned(format!(
                        "{} changed size during the transfer",
                        source.display()
                    ))));
                }
                Ok(PartIo::Upload { reader, upload_id })
            }
            (TransferOp::Copy { source, .. }, Some(upload_id)) => Ok(PartIo::Copy {
                source: source.clone(),
                upload_id,
            }),
            (TransferOp::Download { .. }, _) => {
                let staging = descriptor
                    .staging_path()
                    .ok_or(TransferError::Validation(Cow::Borrowed("no staging path")))?;
                let writer = PartWriter::create(&staging, descriptor.total_size, is_resume).await?;
                Ok(PartIo::Download { writer })
            }
            (_, None) => Err(TransferError::Validation(Cow::Borrowed(
                "no multipart session for transfer",
            ))),
        }
    }

    /// Decide what survives a failed run
    async fn cleanup_failed(
        &self,
        err: &TransferError,
        descriptor: &TransferDescriptor,
        persistence: Option<&Persistence>,
        state: &RunState,
    ) {
        let Some(checkpoint) = &state.checkpoint else {
            return;
        };

        let discard = match err {
            TransferError::SessionInvalid { .. } | TransferError::Integrity { .. } => true,
            TransferError::Fatal { .. } => checkpoint.done_count() == 0,
            // Without a checkpoint nothing can resume later.
            _ => persistence.is_none(),
        };
        if !discard {
            if let Some(p) = persistence {
                info!(path = %p.path.display(), done = checkpoint.done_count(), "checkpoint kept for resume");
            }
            return;
        }

        if !matches!(
            err,
            TransferError::SessionInvalid { .. } | TransferError::Integrity { .. }
        ) {
            self.abort_session(checkpoint).await;
        }
        if let Some(p) = persistence {
            if let Err(e) = p.store.remove(&p.path).await {
                warn!(path = %p.path.display(), error = %e, "failed to remove checkpoint");
            }
        }
        if let Some(staging) = descriptor.staging_path() {
            remove_quietly(&staging).await;
        }
    }

    /// Best-effort abort of the session a checkpoint names
    async fn abort_session(&self, checkpoint: &Checkpoint) {
        let Some(upload_id) = checkpoint.upload_id.as_deref() else {
            return;
        };
        let object = checkpoint.descriptor.op.remote_object();
        match self.store.abort_multipart_upload(object, upload_id).await {
            Ok(()) => info!(session = upload_id, object = %object, "aborted multipart session"),
            Err(e) => warn!(session = upload_id, error = %e, "failed to abort multipart session"),
        }
    }

    fn emit(&self, kind: TransferKind, phase: TransferPhase, checkpoint: Option<&Checkpoint>) {
        let Some(listener) = &self.listener else {
            return;
        };
        let progress = match checkpoint {
            Some(c) => TransferProgress {
                kind,
                phase,
                bytes_done: c.bytes_done(),
                bytes_total: c.descriptor.total_size,
                parts_done: c.done_count(),
                parts_total: c.parts.len(),
            },
            None => TransferProgress {
                kind,
                phase,
                bytes_done: 0,
                bytes_total: 0,
                parts_done: 0,
                parts_total: 0,
            },
        };
        listener.on_progress(&progress);
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}
