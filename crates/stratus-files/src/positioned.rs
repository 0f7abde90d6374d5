//! Positioned file I/O for concurrent part transfers.
//!
//! Every read and write names its own offset, so any number of workers can
//! share one handle without a shared cursor. Blocking syscalls run on the
//! tokio blocking pool.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratus_transport::ByteRange;
use tracing::debug;

/// Shared read handle over an upload source
#[derive(Debug, Clone)]
pub struct PartReader {
    file: Arc<File>,
    size: u64,
}

impl PartReader {
    /// Open `path` for positioned reads
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or stat'ed.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = File::open(&path)?;
            let size = file.metadata()?.len();
            Ok(Self {
                file: Arc::new(file),
                size,
            })
        })
        .await
        .map_err(io::Error::other)?
    }

    /// File size at open time
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read exactly `range` from the file
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the file is shorter than the range end.
    pub async fn read_range(&self, range: ByteRange) -> io::Result<Vec<u8>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let len = usize::try_from(range.len).map_err(io::Error::other)?;
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            read_exact_at(&file, &mut buf, range.offset)?;
            Ok(buf)
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// Shared write handle over a pre-allocated download target
#[derive(Debug, Clone)]
pub struct PartWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl PartWriter {
    /// Open `path` for positioned writes and size it to `total_size`.
    ///
    /// With `keep_existing` the current contents survive (resumed download);
    /// otherwise the file is truncated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or resized.
    pub async fn create(
        path: impl AsRef<Path>,
        total_size: u64,
        keep_existing: bool,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(!keep_existing)
                .open(&path)?;
            file.set_len(total_size)?;
            debug!(path = %path.display(), total_size, keep_existing, "staging file ready");
            Ok(Self {
                file: Arc::new(file),
                path,
            })
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` at `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_at(&self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(io::Error::other)?
    }

    /// Flush file contents to disk
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub async fn sync(&self) -> io::Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(io::Error::other)?
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
