//! Values exchanged across the object-store seam.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote object: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
}

impl ObjectRef {
    /// Create a new object reference
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Half-open byte range `[offset, offset + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte of the range
    pub offset: u64,
    /// Number of bytes in the range
    pub len: u64,
}

impl ByteRange {
    /// Create a new range
    #[must_use]
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One past the last byte of the range
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// True for a zero-length range
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inclusive HTTP `Range` header value, `None` for an empty range
    #[must_use]
    pub fn http_header(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("bytes={}-{}", self.offset, self.end() - 1))
        }
    }
}

/// What the service returns for one uploaded or copied part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// Entity tag of the part
    pub etag: String,
    /// CRC64-ECMA of the part as computed by the service, if it reports one
    pub crc64: Option<u64>,
}

/// A part reference passed to the finalize call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Entity tag returned when the part was uploaded
    pub etag: String,
}

/// Object metadata returned by a `HEAD` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Entity tag
    pub etag: String,
    /// Last-modified time, seconds since the Unix epoch
    pub last_modified: u64,
    /// Whole-object CRC64-ECMA, if the service stores one
    pub crc64: Option<u64>,
}

/// Result of finalizing a multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteOutput {
    /// Entity tag of the assembled object
    pub etag: String,
    /// Whole-object CRC64-ECMA, if the service reports one
    pub crc64: Option<u64>,
}
