//! # STRATUS Files
//!
//! File-side engine for STRATUS transfers.
//!
//! This crate provides:
//! - CRC64-ECMA182 checksums with O(log n) combine
//! - Part planning with service limit validation
//! - Positioned reads and pre-allocated positioned writes for concurrent parts
//! - Source fingerprinting (size, mtime, identity digest, streaming CRC64)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crc64;
pub mod hasher;
pub mod planner;
pub mod positioned;

pub use crc64::Crc64;
pub use planner::{PartLimits, PartPlanner, PlanError, PlannedPart};
pub use positioned::{PartReader, PartWriter};

/// Default part size (8 MiB)
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part the service accepts, except for the last part (100 KiB)
pub const MIN_PART_SIZE: u64 = 100 * 1024;

/// Largest part the service accepts (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Largest part number the service accepts
pub const MAX_PART_COUNT: u64 = 10_000;
