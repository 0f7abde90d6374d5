//! Transfer configuration
//!
//! Loaded from TOML by the embedding application or built in code. Every
//! field has a default, so a partial file such as
//!
//! ```toml
//! part_size = 16777216
//! thread_count = 8
//! checkpoint_dir = "/var/lib/stratus/checkpoints"
//!
//! [retry]
//! max_attempts = 5
//! ```
//!
//! is a complete configuration.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_files::{DEFAULT_PART_SIZE, PartLimits, PartPlanner};

use crate::error::{Result, TransferError};

/// Upper bound on `thread_count`
pub const MAX_THREAD_COUNT: usize = 1000;

/// Run configuration shared by upload, download and copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per part (the last part may be shorter)
    pub part_size: u64,

    /// Maximum parts in flight at once
    pub thread_count: usize,

    /// Where checkpoints live; `None` disables resume
    pub checkpoint_dir: Option<PathBuf>,

    /// Byte throughput cap shared by all workers; `None` or 0 is unlimited
    pub traffic_limit_bytes_per_sec: Option<u64>,

    /// Verify the whole-object CRC64 after completion
    pub enable_checksum_verification: bool,

    /// Part-level retry policy
    pub retry: RetryConfig,

    /// Service multipart limits
    pub limits: PartLimits,

    /// Checkpoints untouched for longer than this are swept by
    /// [`CheckpointStore::cleanup_stale`](crate::CheckpointStore::cleanup_stale)
    pub checkpoint_max_age_days: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            thread_count: 4,
            checkpoint_dir: None,
            traffic_limit_bytes_per_sec: None,
            enable_checksum_verification: true,
            retry: RetryConfig::default(),
            limits: PartLimits::default(),
            checkpoint_max_age_days: 7,
        }
    }
}

impl TransferConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if the file cannot be read and
    /// [`TransferError::Config`] if it cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] on malformed input.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| TransferError::Config(Cow::Owned(e.to_string())))
    }

    /// Serialize to pretty TOML
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TransferError::Config(Cow::Owned(e.to_string())))
    }

    /// Planner for this configuration
    #[must_use]
    pub fn planner(&self) -> PartPlanner {
        PartPlanner::with_part_size(self.part_size).limits(self.limits)
    }

    /// Check size-independent bounds
    ///
    /// Part count is checked later, once the payload size is known.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(TransferError::Validation(Cow::Borrowed(
                "thread_count must be at least 1",
            )));
        }
        if self.thread_count > MAX_THREAD_COUNT {
            return Err(TransferError::Validation(Cow::Owned(format!(
                "thread_count {} exceeds the maximum of {MAX_THREAD_COUNT}",
                self.thread_count
            ))));
        }
        // A part count of one always fits, so this isolates the size bounds.
        self.planner()
            .validate(0)
            .map_err(|e| TransferError::Validation(Cow::Owned(e.to_string())))?;
        self.retry.validate()?;
        Ok(())
    }
}

/// Retry policy consulted by the part retry helper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds
    pub initial_backoff_ms: u64,

    /// Delay cap, in milliseconds
    pub max_backoff_ms: u64,

    /// Growth factor between attempts
    pub multiplier: f64,

    /// Randomize each delay into `[delay/2, delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries: every failure is final after one attempt
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` (1-based) failed
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exp as i32);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);

        let millis = if self.jitter {
            let mut byte = [0u8; 1];
            // Entropy failure only loses the jitter.
            let factor = match getrandom::getrandom(&mut byte) {
                Ok(()) => 0.5 + f64::from(byte[0]) / 510.0,
                Err(_) => 1.0,
            };
            capped * factor
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TransferError::Validation(Cow::Borrowed(
                "retry.max_attempts must be at least 1",
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(TransferError::Validation(Cow::Borrowed(
                "retry.multiplier must be a finite value >= 1.0",
            )));
        }
        Ok(())
    }
}
