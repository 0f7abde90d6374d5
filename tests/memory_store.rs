//! In-memory object store with fault injection and call counters.
//!
//! Stands in for a real storage service in integration tests. Multipart
//! sessions behave like the real thing closely enough for the orchestrator:
//! parts can be re-uploaded, completion assembles parts in the given order,
//! and a missing session is reported as `404 NoSuchUpload`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use stratus_files::crc64;
use stratus_transport::{
    ByteRange, CompleteOutput, CompletedPart, NO_SUCH_UPLOAD, ObjectMeta, ObjectRef, ObjectStore,
    PartReceipt, TransportError, TransportResult,
};

/// Faults applied to subsequent calls
#[derive(Debug, Clone)]
pub struct Faults {
    /// Part number -> remaining `503 SlowDown` responses for upload/copy
    pub transient_on_part: HashMap<u32, u32>,
    /// Byte offset -> remaining `503 SlowDown` responses for ranged reads
    pub transient_on_offset: HashMap<u64, u32>,
    /// Upload/copy of this part fails with `403 AccessDenied`
    pub fatal_on_part: Option<u32>,
    /// Upload/copy of this part never returns
    pub hang_on_part: Option<u32>,
    /// Ranged read at this offset never returns
    pub hang_on_offset: Option<u64>,
    /// After this many successful part uploads the session disappears (once)
    pub drop_session_after_parts: Option<u64>,
    /// Every session disappears once it holds this many parts
    pub drop_every_session_after_parts: Option<usize>,
    /// Next receipt for this part reports a wrong CRC64 (once)
    pub corrupt_part_crc_once: Option<u32>,
    /// Completion reports a CRC64 that does not match the assembled object
    pub wrong_complete_crc: bool,
    /// Report CRC64 values at all
    pub report_crc: bool,
    /// Added latency for every part-moving call
    pub part_delay: Duration,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            transient_on_part: HashMap::new(),
            transient_on_offset: HashMap::new(),
            fatal_on_part: None,
            hang_on_part: None,
            hang_on_offset: None,
            drop_session_after_parts: None,
            drop_every_session_after_parts: None,
            corrupt_part_crc_once: None,
            wrong_complete_crc: false,
            report_crc: true,
            part_delay: Duration::ZERO,
        }
    }
}

/// Snapshot of call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `head_object`
    pub head: u64,
    /// `create_multipart_upload`
    pub create: u64,
    /// `upload_part`
    pub upload_part: u64,
    /// `upload_part_copy`
    pub upload_part_copy: u64,
    /// `get_object_range`
    pub get_range: u64,
    /// `complete_multipart_upload`
    pub complete: u64,
    /// `abort_multipart_upload`
    pub abort: u64,
}

#[derive(Debug, Default)]
struct Counters {
    head: AtomicU64,
    create: AtomicU64,
    upload_part: AtomicU64,
    upload_part_copy: AtomicU64,
    get_range: AtomicU64,
    complete: AtomicU64,
    abort: AtomicU64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    last_modified: u64,
    crc64: u64,
}

#[derive(Debug)]
struct Upload {
    object: ObjectRef,
    parts: BTreeMap<u32, Vec<u8>>,
}

/// Thread-safe in-memory [`ObjectStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectRef, StoredObject>,
    uploads: DashMap<String, Upload>,
    next_id: AtomicU64,
    clock: AtomicU64,
    counters: Counters,
    faults: Mutex<Faults>,
    parts_accepted: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    aborted: Mutex<Vec<String>>,
    completions: Mutex<Vec<Vec<u32>>>,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn slow_down() -> TransportError {
    TransportError::status(503, "SlowDown", "please reduce your request rate")
}

fn no_such_upload(upload_id: &str) -> TransportError {
    TransportError::status(404, NO_SUCH_UPLOAD, format!("upload {upload_id} does not exist"))
}

fn no_such_key(object: &ObjectRef) -> TransportError {
    TransportError::status(404, "NoSuchKey", format!("{object} does not exist"))
}

fn etag_for(data: &[u8]) -> String {
    format!("\"{:016x}\"", crc64::calc(0, data))
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an object
    pub fn put_object(&self, object: &ObjectRef, data: Vec<u8>) {
        let crc = crc64::calc(0, &data);
        let stored = StoredObject {
            etag: etag_for(&data),
            last_modified: 1_700_000_000 + self.clock.fetch_add(1, Ordering::SeqCst),
            crc64: crc,
            data,
        };
        self.objects.insert(object.clone(), stored);
    }

    /// Contents of an object
    pub fn object_data(&self, object: &ObjectRef) -> Option<Vec<u8>> {
        self.objects.get(object).map(|o| o.data.clone())
    }

    /// Flip one stored byte while keeping the recorded ETag and CRC64,
    /// as silent corruption at rest would
    pub fn corrupt_object(&self, object: &ObjectRef, offset: usize) {
        if let Some(mut stored) = self.objects.get_mut(object) {
            stored.data[offset] ^= 0xFF;
        }
    }

    /// Change the active faults
    pub fn set_faults(&self, update: impl FnOnce(&mut Faults)) {
        let mut faults = self.faults.lock().unwrap();
        update(&mut faults);
    }

    /// Clear all faults
    pub fn clear_faults(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    /// Call counters so far
    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            head: c.head.load(Ordering::SeqCst),
            create: c.create.load(Ordering::SeqCst),
            upload_part: c.upload_part.load(Ordering::SeqCst),
            upload_part_copy: c.upload_part_copy.load(Ordering::SeqCst),
            get_range: c.get_range.load(Ordering::SeqCst),
            complete: c.complete.load(Ordering::SeqCst),
            abort: c.abort.load(Ordering::SeqCst),
        }
    }

    /// Highest number of part calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sessions still open
    pub fn open_sessions(&self) -> Vec<String> {
        self.uploads.iter().map(|e| e.key().clone()).collect()
    }

    /// Sessions aborted so far
    pub fn aborted_sessions(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Part numbers of every completion call, in the order they were passed
    pub fn completion_orders(&self) -> Vec<Vec<u32>> {
        self.completions.lock().unwrap().clone()
    }

    fn faults(&self) -> Faults {
        self.faults.lock().unwrap().clone()
    }

    async fn enter_part_call(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlightGuard(&self.in_flight);

        let delay = self.faults.lock().unwrap().part_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        guard
    }

    /// Shared fault handling for upload and copy parts
    async fn part_faults(&self, part_number: u32) -> TransportResult<()> {
        let hang = {
            let mut faults = self.faults.lock().unwrap();
            if faults.fatal_on_part == Some(part_number) {
                return Err(TransportError::status(403, "AccessDenied", "access denied"));
            }
            if let Some(remaining) = faults.transient_on_part.get_mut(&part_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(slow_down());
                }
            }
            faults.hang_on_part == Some(part_number)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn store_part(&self, upload_id: &str, part_number: u32, body: Vec<u8>) -> TransportResult<PartReceipt> {
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let mut crc = crc64::calc(0, &body);
        let etag = etag_for(&body);
        upload.parts.insert(part_number, body);
        let held = upload.parts.len();
        drop(upload);

        let accepted = self.parts_accepted.fetch_add(1, Ordering::SeqCst) + 1;
        let mut faults = self.faults.lock().unwrap();
        if faults.drop_session_after_parts == Some(accepted) {
            faults.drop_session_after_parts = None;
            self.uploads.remove(upload_id);
        }
        if faults.drop_every_session_after_parts == Some(held) {
            self.uploads.remove(upload_id);
        }
        if faults.corrupt_part_crc_once == Some(part_number) {
            faults.corrupt_part_crc_once = None;
            crc ^= 0xDEAD;
        }

        Ok(PartReceipt {
            etag,
            crc64: faults.report_crc.then_some(crc),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(&self, object: &ObjectRef) -> TransportResult<ObjectMeta> {
        self.counters.head.fetch_add(1, Ordering::SeqCst);
        let stored = self.objects.get(object).ok_or_else(|| no_such_key(object))?;
        Ok(ObjectMeta {
            size: stored.data.len() as u64,
            etag: stored.etag.clone(),
            last_modified: stored.last_modified,
            crc64: self.faults().report_crc.then_some(stored.crc64),
        })
    }

    async fn create_multipart_upload(&self, object: &ObjectRef) -> TransportResult<String> {
        self.counters.create.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.insert(
            upload_id.clone(),
            Upload {
                object: object.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _object: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> TransportResult<PartReceipt> {
        self.counters.upload_part.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter_part_call().await;
        self.part_faults(part_number).await?;
        self.store_part(upload_id, part_number, body)
    }

    async fn upload_part_copy(
        &self,
        _object: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        source: &ObjectRef,
        range: ByteRange,
    ) -> TransportResult<PartReceipt> {
        self.counters.upload_part_copy.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter_part_call().await;
        self.part_faults(part_number).await?;

        let body = {
            let stored = self.objects.get(source).ok_or_else(|| no_such_key(source))?;
            let end = range.end() as usize;
            if end > stored.data.len() {
                return Err(TransportError::status(416, "InvalidRange", "range not satisfiable"));
            }
            stored.data[range.offset as usize..end].to_vec()
        };
        self.store_part(upload_id, part_number, body)
    }

    async fn get_object_range(&self, object: &ObjectRef, range: ByteRange) -> TransportResult<Vec<u8>> {
        self.counters.get_range.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter_part_call().await;

        let hang = {
            let mut faults = self.faults.lock().unwrap();
            if let Some(remaining) = faults.transient_on_offset.get_mut(&range.offset) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(slow_down());
                }
            }
            faults.hang_on_offset == Some(range.offset)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let stored = self.objects.get(object).ok_or_else(|| no_such_key(object))?;
        let end = range.end() as usize;
        if range.is_empty() || end > stored.data.len() {
            return Err(TransportError::status(416, "InvalidRange", "range not satisfiable"));
        }
        Ok(stored.data[range.offset as usize..end].to_vec())
    }

    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<CompleteOutput> {
        self.counters.complete.fetch_add(1, Ordering::SeqCst);
        self.completions
            .lock()
            .unwrap()
            .push(parts.iter().map(|p| p.part_number).collect());

        let (_, upload) = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        if &upload.object != object {
            return Err(TransportError::status(400, "InvalidRequest", "object mismatch"));
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(TransportError::status(400, "InvalidPartOrder", "parts out of order"));
            }
            previous = part.part_number;
            let body = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| TransportError::status(400, "InvalidPart", "part missing"))?;
            if etag_for(body) != part.etag {
                return Err(TransportError::status(400, "InvalidPart", "etag mismatch"));
            }
            data.extend_from_slice(body);
        }

        let etag = format!("\"{:016x}-{}\"", crc64::calc(0, &data), parts.len());
        let crc = crc64::calc(0, &data);
        self.put_object(object, data);

        let faults = self.faults();
        let reported = if faults.wrong_complete_crc { crc ^ 1 } else { crc };
        Ok(CompleteOutput {
            etag,
            crc64: faults.report_crc.then_some(reported),
        })
    }

    async fn abort_multipart_upload(&self, _object: &ObjectRef, upload_id: &str) -> TransportResult<()> {
        self.counters.abort.fetch_add(1, Ordering::SeqCst);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        self.uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }
}
