//! Source fingerprinting: whole-file CRC64 and identity digests.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::crc64::Crc64;

/// Read block size for streaming checksums
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// CRC64 of an entire file, streamed in [`HASH_BLOCK_SIZE`] blocks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn crc64_file_blocking<P: AsRef<Path>>(path: P) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    let mut crc = Crc64::new();
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        crc.update(&buf[..n]);
    }
    Ok(crc.finalize())
}

/// Async wrapper around [`crc64_file_blocking`].
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn crc64_file(path: PathBuf) -> io::Result<u64> {
    let path_display = path.display().to_string();
    let crc = tokio::task::spawn_blocking(move || crc64_file_blocking(path))
        .await
        .map_err(io::Error::other)??;
    debug!(path = %path_display, crc64 = format_args!("{crc:#018x}"), "file checksum computed");
    Ok(crc)
}

/// BLAKE3 hex digest over length-prefixed fields.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` distinct.
pub fn identity_digest(fields: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hasher.finalize().to_hex().to_string()
}

/// Size, modification time and identity of a local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprint {
    /// File size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub modified: u64,
    /// Digest over path, size, nanosecond mtime and (on unix) device/inode
    pub identity: String,
}

/// Fingerprint a local file without reading its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be stat'ed or is a directory.
pub async fn fingerprint(path: &Path) -> io::Result<SourceFingerprint> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        ));
    }

    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    #[cfg(unix)]
    let node = {
        use std::os::unix::fs::MetadataExt;
        [meta.dev().to_le_bytes(), meta.ino().to_le_bytes()].concat()
    };
    #[cfg(not(unix))]
    let node: Vec<u8> = Vec::new();

    let path_bytes = path.to_string_lossy();
    let identity = identity_digest(&[
        path_bytes.as_bytes(),
        &meta.len().to_le_bytes(),
        &mtime.as_nanos().to_le_bytes(),
        &node,
    ]);

    Ok(SourceFingerprint {
        size: meta.len(),
        modified: mtime.as_secs(),
        identity,
    })
}
