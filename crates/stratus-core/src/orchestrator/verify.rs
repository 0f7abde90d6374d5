//! Whole-object checksum verification
//!
//! Part CRCs are folded with `combine` in ascending part order, so the final
//! check never re-reads transferred bytes.

use stratus_files::Crc64;
use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::error::{Result, TransferError};

/// CRC64 of the whole object from its part CRCs, `None` if any is unknown
pub(crate) fn combine_parts(checkpoint: &Checkpoint) -> Option<u64> {
    let mut crc = Crc64::new();
    for part in checkpoint.parts.values() {
        if !part.completed {
            return None;
        }
        crc.append(part.crc64?, part.range.len);
    }
    Some(crc.finalize())
}

/// Outcome of a successful verification step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Verified {
    /// Best known whole-object CRC64
    pub crc64: Option<u64>,
    /// Whether a comparison against the source actually happened
    pub checked: bool,
}

/// Compare the source checksum against what was transferred.
///
/// `combined` is derived from part CRCs, `service` is what the finalize call
/// reported. Every known value must agree with `expected`; if `expected` or
/// both observed values are unknown, verification is skipped with a warning.
pub(crate) fn verify(
    enabled: bool,
    expected: Option<u64>,
    combined: Option<u64>,
    service: Option<u64>,
) -> Result<Verified> {
    let best = combined.or(service);
    if !enabled {
        return Ok(Verified {
            crc64: best,
            checked: false,
        });
    }

    let Some(expected) = expected else {
        warn!("source checksum unknown, skipping integrity verification");
        return Ok(Verified {
            crc64: best,
            checked: false,
        });
    };

    if combined.is_none() && service.is_none() {
        warn!("part checksums unavailable, skipping integrity verification");
        return Ok(Verified {
            crc64: None,
            checked: false,
        });
    }

    for actual in [combined, service].into_iter().flatten() {
        if actual != expected {
            return Err(TransferError::Integrity { expected, actual });
        }
    }

    debug!(crc64 = format_args!("{expected:#018x}"), "integrity verified");
    Ok(Verified {
        crc64: Some(expected),
        checked: true,
    })
}
