//! Part planning.
//!
//! Splits a payload of known size into the contiguous byte ranges that make up
//! a multipart session. Part numbers are 1-based.

use serde::{Deserialize, Serialize};
use stratus_transport::ByteRange;

use crate::{DEFAULT_PART_SIZE, MAX_PART_COUNT, MAX_PART_SIZE, MIN_PART_SIZE};

/// Planning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Part size of zero
    #[error("part size must be greater than zero")]
    ZeroPartSize,

    /// Part size below the service minimum
    #[error("part size {size} is below the minimum of {min} bytes")]
    PartTooSmall {
        /// Requested part size
        size: u64,
        /// Service minimum
        min: u64,
    },

    /// Part size above the service maximum
    #[error("part size {size} exceeds the maximum of {max} bytes")]
    PartTooLarge {
        /// Requested part size
        size: u64,
        /// Service maximum
        max: u64,
    },

    /// The payload would need more parts than the service accepts
    #[error("{count} parts exceed the limit of {max}")]
    TooManyParts {
        /// Parts needed
        count: u64,
        /// Service limit
        max: u64,
    },
}

/// Service-imposed multipart limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartLimits {
    /// Smallest accepted part (the last part may be shorter)
    pub min_part_size: u64,
    /// Largest accepted part
    pub max_part_size: u64,
    /// Largest accepted part number
    pub max_part_count: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_part_count: MAX_PART_COUNT,
        }
    }
}

/// One planned part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPart {
    /// 1-based part number
    pub number: u32,
    /// Bytes covered by the part
    pub range: ByteRange,
}

/// Number of parts for a payload: `ceil(total / part)`, at least one.
#[must_use]
pub fn part_count(total_size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    total_size.div_ceil(part_size).max(1)
}

/// Partition `[0, total_size)` into parts of `part_size` bytes.
///
/// Part *i* covers `[(i-1)*part_size, min(i*part_size, total_size))`. An empty
/// payload yields exactly one zero-length part so the object still gets created.
///
/// # Errors
///
/// Returns [`PlanError::ZeroPartSize`] for a zero part size and
/// [`PlanError::TooManyParts`] if part numbers would overflow `u32`.
pub fn plan(total_size: u64, part_size: u64) -> Result<Vec<PlannedPart>, PlanError> {
    if part_size == 0 {
        return Err(PlanError::ZeroPartSize);
    }

    let count = part_count(total_size, part_size);
    if count > u64::from(u32::MAX) {
        return Err(PlanError::TooManyParts {
            count,
            max: u64::from(u32::MAX),
        });
    }

    let parts = (0..count)
        .map(|i| {
            // offset < total_size for every part but the empty one
            let offset = i * part_size;
            PlannedPart {
                number: (i + 1) as u32,
                range: ByteRange::new(offset, part_size.min(total_size - offset)),
            }
        })
        .collect();

    Ok(parts)
}

/// Validating planner bound to a part size and the service limits
#[derive(Debug, Clone, Copy)]
pub struct PartPlanner {
    part_size: u64,
    limits: PartLimits,
}

impl PartPlanner {
    /// Create a planner with the default part size and limits
    pub fn new() -> Self {
        Self::with_part_size(DEFAULT_PART_SIZE)
    }

    /// Create a planner with a custom part size and default limits
    pub fn with_part_size(part_size: u64) -> Self {
        Self {
            part_size,
            limits: PartLimits::default(),
        }
    }

    /// Replace the service limits
    #[must_use]
    pub fn limits(mut self, limits: PartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Get part size
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Check the part size against the limits, and the resulting part count
    /// for `total_size` against the maximum.
    ///
    /// # Errors
    ///
    /// Returns the first violated limit.
    pub fn validate(&self, total_size: u64) -> Result<(), PlanError> {
        if self.part_size == 0 {
            return Err(PlanError::ZeroPartSize);
        }
        if self.part_size < self.limits.min_part_size {
            return Err(PlanError::PartTooSmall {
                size: self.part_size,
                min: self.limits.min_part_size,
            });
        }
        if self.part_size > self.limits.max_part_size {
            return Err(PlanError::PartTooLarge {
                size: self.part_size,
                max: self.limits.max_part_size,
            });
        }
        let count = part_count(total_size, self.part_size);
        if count > self.limits.max_part_count {
            return Err(PlanError::TooManyParts {
                count,
                max: self.limits.max_part_count,
            });
        }
        Ok(())
    }

    /// Validate, then plan.
    ///
    /// # Errors
    ///
    /// Returns the first violated limit.
    pub fn plan(&self, total_size: u64) -> Result<Vec<PlannedPart>, PlanError> {
        self.validate(total_size)?;
        plan(total_size, self.part_size)
    }
}

impl Default for PartPlanner {
    fn default() -> Self {
        Self::new()
    }
}
