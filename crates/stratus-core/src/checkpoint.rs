//! Checkpoint persistence and recovery
//!
//! One JSON file per transfer, named from [`TransferDescriptor::checkpoint_key`]
//! inside the configured checkpoint directory. Each record carries its format
//! version and a BLAKE3 digest of its own body, and is rewritten by
//! write-to-temp, fsync, rename, so a crash mid-write leaves the previous
//! record intact.
//!
//! Only the orchestrator mutates and saves a checkpoint; workers report
//! completions back to it.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use stratus_files::hasher::identity_digest;
use stratus_files::planner::{part_count, plan};
use stratus_transport::{ByteRange, CompletedPart};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::descriptor::{TransferDescriptor, TransferKind};
use crate::error::CheckpointError;

/// Current record format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Oldest record format this build reads
pub const MIN_CHECKPOINT_VERSION: u32 = 1;

/// Checkpoint file extension
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Durable state of one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    /// 1-based part number
    pub number: u32,
    /// Bytes covered
    pub range: ByteRange,
    /// Remote call returned success
    pub completed: bool,
    /// Entity tag returned for the part (upload and copy)
    pub etag: Option<String>,
    /// CRC64 of the part's bytes, when known
    pub crc64: Option<u64>,
}

/// In-progress transfer state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Record format version
    pub version: u32,

    /// Operation kind
    pub kind: TransferKind,

    /// Descriptor the checkpoint was created for
    pub descriptor: TransferDescriptor,

    /// Remote multipart session (upload and copy)
    pub upload_id: Option<String>,

    /// Per-part status keyed by part number
    pub parts: BTreeMap<u32, PartRecord>,

    /// Whole-object CRC64 the final result must match
    pub expected_crc64: Option<u64>,

    /// Creation time, seconds since the Unix epoch
    pub created_at: u64,

    /// Last save, seconds since the Unix epoch
    pub updated_at: u64,

    /// BLAKE3 hex digest of the record with this field empty
    #[serde(default)]
    pub digest: String,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Checkpoint {
    /// Fresh checkpoint with every part pending
    pub fn new(
        descriptor: TransferDescriptor,
        upload_id: Option<String>,
        expected_crc64: Option<u64>,
    ) -> Self {
        let parts = plan(descriptor.total_size, descriptor.part_size)
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                (
                    p.number,
                    PartRecord {
                        number: p.number,
                        range: p.range,
                        completed: false,
                        etag: None,
                        crc64: None,
                    },
                )
            })
            .collect();
        let now = unix_now();

        Self {
            version: CHECKPOINT_VERSION,
            kind: descriptor.kind(),
            descriptor,
            upload_id,
            parts,
            expected_crc64,
            created_at: now,
            updated_at: now,
            digest: String::new(),
        }
    }

    /// Why this checkpoint cannot resume `descriptor`, if it cannot
    pub fn mismatch(&self, descriptor: &TransferDescriptor) -> Option<&'static str> {
        let saved = &self.descriptor;
        if self.kind != descriptor.kind() || saved.kind() != self.kind {
            return Some("operation type changed");
        }
        if saved.op != descriptor.op {
            return Some("source or target changed");
        }
        if saved.total_size != descriptor.total_size {
            return Some("source size changed");
        }
        if saved.source_mod_time != descriptor.source_mod_time {
            return Some("source modification time changed");
        }
        if saved.source_identity_hash != descriptor.source_identity_hash {
            return Some("source identity changed");
        }
        if saved.part_size != descriptor.part_size {
            return Some("part size changed");
        }
        if self.parts.len() as u64 != part_count(descriptor.total_size, descriptor.part_size) {
            return Some("part layout does not match");
        }
        if self.kind != TransferKind::Download && self.upload_id.is_none() {
            return Some("no multipart session recorded");
        }
        let needs_etag = self.kind != TransferKind::Download;
        if self
            .parts
            .values()
            .any(|p| p.completed && needs_etag && p.etag.is_none())
        {
            return Some("completed part without entity tag");
        }
        None
    }

    /// Whether this checkpoint can resume `descriptor`
    pub fn validate(&self, descriptor: &TransferDescriptor) -> bool {
        self.mismatch(descriptor).is_none()
    }

    /// Record a part as done
    pub fn complete_part(&mut self, number: u32, etag: Option<String>, crc64: Option<u64>) {
        if let Some(record) = self.parts.get_mut(&number) {
            record.completed = true;
            record.etag = etag;
            record.crc64 = crc64;
        }
    }

    /// Check if a part is done
    pub fn is_part_complete(&self, number: u32) -> bool {
        self.parts.get(&number).is_some_and(|p| p.completed)
    }

    /// Number of parts done
    pub fn done_count(&self) -> usize {
        self.parts.values().filter(|p| p.completed).count()
    }

    /// Bytes covered by done parts
    pub fn bytes_done(&self) -> u64 {
        self.parts
            .values()
            .filter(|p| p.completed)
            .map(|p| p.range.len)
            .sum()
    }

    /// All parts done
    pub fn is_complete(&self) -> bool {
        self.parts.values().all(|p| p.completed)
    }

    /// Done parts with entity tags, ascending by part number
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .values()
            .filter(|p| p.completed)
            .map(|p| CompletedPart {
                part_number: p.number,
                etag: p.etag.clone().unwrap_or_default(),
            })
            .collect()
    }

    fn body_digest(&self) -> Result<String, CheckpointError> {
        let mut body = self.clone();
        body.digest = String::new();
        let bytes = serde_json::to_vec(&body)?;
        Ok(identity_digest(&[&bytes]))
    }

    /// Serialize, refreshing the digest
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Serialization`] if encoding fails.
    pub fn encode(&mut self) -> Result<Vec<u8>, CheckpointError> {
        self.digest = self.body_digest()?;
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and check version and digest
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::UnsupportedVersion`] for a foreign format
    /// and [`CheckpointError::Corrupt`] for anything unparseable or tampered.
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| CheckpointError::Corrupt(Cow::Owned(e.to_string())))?;
        if !(MIN_CHECKPOINT_VERSION..=CHECKPOINT_VERSION).contains(&probe.version) {
            return Err(CheckpointError::UnsupportedVersion {
                found: probe.version,
                min: MIN_CHECKPOINT_VERSION,
                max: CHECKPOINT_VERSION,
            });
        }

        let checkpoint: Self = serde_json::from_slice(bytes)
            .map_err(|e| CheckpointError::Corrupt(Cow::Owned(e.to_string())))?;
        if checkpoint.digest != checkpoint.body_digest()? {
            return Err(CheckpointError::Corrupt(Cow::Borrowed("digest mismatch")));
        }
        Ok(checkpoint)
    }
}

/// Directory of checkpoint files
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file for a transfer
    pub fn path_for(&self, descriptor: &TransferDescriptor) -> PathBuf {
        self.dir.join(format!(
            "{}.{CHECKPOINT_EXTENSION}",
            descriptor.checkpoint_key()
        ))
    }

    /// Load a checkpoint; `Ok(None)` if the file does not exist
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] or
    /// [`CheckpointError::UnsupportedVersion`] for an unusable file, and
    /// [`CheckpointError::Io`] if it cannot be read.
    pub async fn load(&self, path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Checkpoint::decode(&bytes).map(Some)
    }

    /// Atomically replace the checkpoint at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, writing, syncing or renaming fails. The
    /// previous file is untouched in that case.
    pub async fn save(&self, path: &Path, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        checkpoint.updated_at = unix_now();
        let bytes = checkpoint.encode()?;

        let tmp = path.with_extension(format!("{CHECKPOINT_EXTENSION}.tmp.{}", std::process::id()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), done = checkpoint.done_count(), "checkpoint saved");
        Ok(())
    }

    /// Delete the checkpoint at `path`; a missing file is not an error
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the file exists but cannot be removed.
    pub async fn remove(&self, path: &Path) -> Result<(), CheckpointError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable checkpoint in the directory
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the directory cannot be listed.
    pub async fn list(&self) -> Result<Vec<(PathBuf, Checkpoint)>, CheckpointError> {
        let mut found = Vec::new();
        for path in self.checkpoint_files().await? {
            match self.load(&path).await {
                Ok(Some(checkpoint)) => found.push((path, checkpoint)),
                Ok(None) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Remove checkpoints not saved within `max_age`, including unreadable
    /// files whose modification time is that old. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the directory cannot be listed or a
    /// stale file cannot be removed.
    pub async fn cleanup_stale(&self, max_age: Duration) -> Result<usize, CheckpointError> {
        let now = unix_now();
        let max_age = max_age.as_secs();
        let mut removed = 0;

        for path in self.checkpoint_files().await? {
            let last_saved = match self.load(&path).await {
                Ok(Some(checkpoint)) => checkpoint.updated_at,
                Ok(None) => continue,
                Err(_) => fs::metadata(&path)
                    .await?
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default(),
            };
            if now.saturating_sub(last_saved) > max_age {
                self.remove(&path).await?;
                warn!(path = %path.display(), "removed stale checkpoint");
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn checkpoint_files(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some(CHECKPOINT_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TransferOp;
    use stratus_transport::ObjectRef;
    use tempfile::TempDir;

    const KIB: u64 = 1024;

    fn descriptor() -> TransferDescriptor {
        TransferDescriptor {
            op: TransferOp::Upload {
                source: PathBuf::from("/data/archive.tar"),
                target: ObjectRef::new("backups", "archive.tar"),
            },
            total_size: 250 * KIB,
            part_size: 100 * KIB,
            thread_count: 4,
            checkpoint_dir: None,
            traffic_limit_bytes_per_sec: None,
            source_mod_time: 1_700_000_000,
            source_identity_hash: "a".repeat(64),
            remote_crc64: None,
        }
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(descriptor(), Some("upload-1".into()), Some(0xFEED))
    }

    #[test]
    fn test_new_checkpoint_layout() {
        let cp = checkpoint();
        assert_eq!(cp.version, CHECKPOINT_VERSION);
        assert_eq!(cp.kind, TransferKind::Upload);
        assert_eq!(cp.parts.len(), 3);
        assert_eq!(cp.parts[&3].range, ByteRange::new(200 * KIB, 50 * KIB));
        assert_eq!(cp.done_count(), 0);
        assert!(!cp.is_complete());
        assert!(cp.validate(&descriptor()));
    }

    #[test]
    fn test_complete_parts_ordered() {
        let mut cp = checkpoint();
        cp.complete_part(3, Some("e3".into()), Some(3));
        cp.complete_part(1, Some("e1".into()), Some(1));

        assert_eq!(cp.done_count(), 2);
        assert_eq!(cp.bytes_done(), 150 * KIB);
        assert!(cp.is_part_complete(3));
        assert!(!cp.is_part_complete(2));
        let numbers: Vec<u32> = cp.completed_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_mismatch_reasons() {
        let cp = checkpoint();

        let mut d = descriptor();
        d.total_size += 1;
        assert_eq!(cp.mismatch(&d), Some("source size changed"));

        let mut d = descriptor();
        d.source_mod_time += 1;
        assert_eq!(cp.mismatch(&d), Some("source modification time changed"));

        let mut d = descriptor();
        d.source_identity_hash = "b".repeat(64);
        assert_eq!(cp.mismatch(&d), Some("source identity changed"));

        let mut d = descriptor();
        d.part_size = 125 * KIB;
        assert_eq!(cp.mismatch(&d), Some("part size changed"));

        let mut d = descriptor();
        d.op = TransferOp::Upload {
            source: PathBuf::from("/data/archive.tar"),
            target: ObjectRef::new("backups", "other.tar"),
        };
        assert_eq!(cp.mismatch(&d), Some("source or target changed"));

        let mut d = descriptor();
        d.op = TransferOp::Download {
            source: ObjectRef::new("backups", "archive.tar"),
            target: PathBuf::from("/data/archive.tar"),
        };
        assert_eq!(cp.mismatch(&d), Some("operation type changed"));

        // Thread count and rate limit are not part of the identity.
        let mut d = descriptor();
        d.thread_count = 16;
        d.traffic_limit_bytes_per_sec = Some(1);
        assert!(cp.validate(&d));
    }

    #[test]
    fn test_missing_session_invalidates_upload() {
        let cp = Checkpoint::new(descriptor(), None, None);
        assert_eq!(cp.mismatch(&descriptor()), Some("no multipart session recorded"));
    }

    #[test]
    fn test_decode_detects_tampering() {
        let mut cp = checkpoint();
        let bytes = cp.encode().unwrap();
        assert_eq!(Checkpoint::decode(&bytes).unwrap(), cp);

        let tampered = String::from_utf8(bytes)
            .unwrap()
            .replace("upload-1", "upload-2");
        let err = Checkpoint::decode(tampered.as_bytes()).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt(_)));
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut cp = checkpoint();
        cp.version = CHECKPOINT_VERSION + 1;
        let bytes = serde_json::to_vec(&cp).unwrap();
        let err = Checkpoint::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::UnsupportedVersion { found, .. } if found == CHECKPOINT_VERSION + 1
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Checkpoint::decode(b"{not json"),
            Err(CheckpointError::Corrupt(_))
        ));
        assert!(matches!(
            Checkpoint::decode(br#"{"version": 1}"#),
            Err(CheckpointError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"));
        let path = store.path_for(&descriptor());
        assert_eq!(store.load(&path).await.unwrap(), None);

        let mut cp = checkpoint();
        cp.complete_part(2, Some("etag-2".into()), Some(22));
        store.save(&path, &mut cp).await.unwrap();

        let loaded = store.load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert!(loaded.is_part_complete(2));

        // Only the checkpoint itself remains, no temp file.
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        store.remove(&path).await.unwrap();
        assert_eq!(store.load(&path).await.unwrap(), None);
        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let path = store.path_for(&descriptor());

        let mut cp = checkpoint();
        store.save(&path, &mut cp).await.unwrap();
        cp.complete_part(1, Some("e1".into()), None);
        store.save(&path, &mut cp).await.unwrap();

        let loaded = store.load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.done_count(), 1);
    }

    #[tokio::test]
    async fn test_list_and_cleanup_stale() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut fresh = checkpoint();
        let fresh_path = store.path_for(&fresh.descriptor);
        store.save(&fresh_path, &mut fresh).await.unwrap();

        let mut old_desc = descriptor();
        old_desc.op = TransferOp::Upload {
            source: PathBuf::from("/data/old.tar"),
            target: ObjectRef::new("backups", "old.tar"),
        };
        let mut old = Checkpoint::new(old_desc, Some("upload-0".into()), None);
        old.updated_at = unix_now() - 30 * 24 * 3600;
        let old_path = store.path_for(&old.descriptor);
        std::fs::write(&old_path, old.encode().unwrap()).unwrap();

        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);

        let removed = store
            .cleanup_stale(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!old_path.exists());
        assert!(fresh_path.exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.cleanup_stale(Duration::ZERO).await.unwrap(), 0);
    }
}
