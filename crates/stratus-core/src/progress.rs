//! Run progress and result aggregation
//!
//! Workers never touch these directly: they report each finished part to the
//! orchestrator, which folds the report into a [`RunSummary`] and emits a
//! [`TransferProgress`] snapshot to the optional listener.

use std::fmt;
use std::time::Duration;

use crate::descriptor::TransferKind;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Resolving the descriptor and loading the checkpoint
    Init,
    /// Opening or reusing the remote session
    SessionEstablish,
    /// Parts being transferred
    PartsInFlight,
    /// Finalizing the remote session
    Completing,
    /// Comparing whole-object checksums
    Verifying,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
    /// Stopped by cancellation
    Aborted,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::SessionEstablish => "SessionEstablish",
            Self::PartsInFlight => "PartsInFlight",
            Self::Completing => "Completing",
            Self::Verifying => "Verifying",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Progress snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Operation kind
    pub kind: TransferKind,

    /// Current phase
    pub phase: TransferPhase,

    /// Bytes in done parts, including parts reused from a checkpoint
    pub bytes_done: u64,

    /// Payload size
    pub bytes_total: u64,

    /// Done parts
    pub parts_done: usize,

    /// Planned parts
    pub parts_total: usize,
}

impl TransferProgress {
    /// Progress percentage (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return if self.parts_done == self.parts_total { 100.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.bytes_total as f64) * 100.0
    }
}

/// Receives progress snapshots from the orchestrator
///
/// Called from the orchestrator task between part completions; keep it cheap.
pub trait ProgressListener: Send + Sync {
    /// Handle one snapshot
    fn on_progress(&self, progress: &TransferProgress);
}

impl<F> ProgressListener for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TransferProgress) {
        self(progress);
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Operation kind
    pub kind: TransferKind,

    /// Payload size
    pub total_bytes: u64,

    /// Planned parts
    pub parts_total: usize,

    /// Parts transferred by this run
    pub parts_transferred: usize,

    /// Parts skipped because a checkpoint marked them done
    pub parts_resumed: usize,

    /// Bytes moved by this run
    pub bytes_transferred: u64,

    /// Part attempts beyond the first
    pub retries: u32,

    /// Remote sessions that were found gone and reopened
    pub session_restarts: u32,

    /// Session id the object was completed under
    pub upload_id: Option<String>,

    /// Whole-object CRC64, when known
    pub crc64: Option<u64>,

    /// Whether the CRC64 was compared against the source
    pub verified: bool,

    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    pub(crate) fn new(kind: TransferKind, total_bytes: u64, parts_total: usize) -> Self {
        Self {
            kind,
            total_bytes,
            parts_total,
            parts_transferred: 0,
            parts_resumed: 0,
            bytes_transferred: 0,
            retries: 0,
            session_restarts: 0,
            upload_id: None,
            crc64: None,
            verified: false,
            elapsed: Duration::ZERO,
        }
    }

    /// Fold in one part finished by this run
    pub(crate) fn record_part(&mut self, bytes: u64, attempts: u32) {
        self.parts_transferred += 1;
        self.bytes_transferred += bytes;
        self.retries += attempts.saturating_sub(1);
    }

    /// Average throughput of this run in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percent() {
        let mut p = TransferProgress {
            kind: TransferKind::Upload,
            phase: TransferPhase::PartsInFlight,
            bytes_done: 50,
            bytes_total: 200,
            parts_done: 1,
            parts_total: 4,
        };
        assert_eq!(p.percent(), 25.0);

        p.bytes_total = 0;
        p.bytes_done = 0;
        p.parts_total = 1;
        assert_eq!(p.percent(), 0.0);
        p.parts_done = 1;
        assert_eq!(p.percent(), 100.0);
    }

    #[test]
    fn test_closure_listener() {
        let seen = Mutex::new(Vec::new());
        let listener = |p: &TransferProgress| seen.lock().unwrap().push(p.parts_done);
        let snapshot = TransferProgress {
            kind: TransferKind::Copy,
            phase: TransferPhase::Done,
            bytes_done: 1,
            bytes_total: 1,
            parts_done: 1,
            parts_total: 1,
        };
        listener.on_progress(&snapshot);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_summary_accumulates() {
        let mut summary = RunSummary::new(TransferKind::Download, 300, 3);
        summary.record_part(100, 1);
        summary.record_part(100, 3);
        assert_eq!(summary.parts_transferred, 2);
        assert_eq!(summary.bytes_transferred, 200);
        assert_eq!(summary.retries, 2);

        summary.elapsed = Duration::from_secs(2);
        assert_eq!(summary.throughput(), 100.0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TransferPhase::PartsInFlight.to_string(), "PartsInFlight");
    }
}
