//! Object-store trait abstraction.
//!
//! The transfer engine talks to a storage service only through [`ObjectStore`].
//! Implementations own request signing, marshaling and the HTTP stack; they
//! are expected to enforce their own request timeouts and surface them as
//! [`TransportError::Timeout`](crate::TransportError::Timeout).

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::types::{ByteRange, CompleteOutput, CompletedPart, ObjectMeta, ObjectRef, PartReceipt};

/// Async multipart session API of an object-storage service.
///
/// All methods take `&self`; a single store is shared by every worker of a
/// run, so implementations must be safe to call concurrently.
///
/// # Examples
///
/// ```no_run
/// use stratus_transport::{ObjectRef, ObjectStore, TransportResult};
///
/// async fn one_part_upload<S: ObjectStore>(store: &S, body: Vec<u8>) -> TransportResult<()> {
///     let object = ObjectRef::new("media", "video.mp4");
///     let upload_id = store.create_multipart_upload(&object).await?;
///     let receipt = store.upload_part(&object, &upload_id, 1, body).await?;
///     let parts = [stratus_transport::CompletedPart { part_number: 1, etag: receipt.etag }];
///     store.complete_multipart_upload(&object, &upload_id, &parts).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch size, entity tag, modification time and stored checksum.
    ///
    /// # Errors
    /// Returns `TransportError` if the object does not exist or the call fails
    async fn head_object(&self, object: &ObjectRef) -> TransportResult<ObjectMeta>;

    /// Open a multipart session for `object` and return its id.
    ///
    /// # Errors
    /// Returns `TransportError` if the session cannot be created
    async fn create_multipart_upload(&self, object: &ObjectRef) -> TransportResult<String>;

    /// Upload the body of one part.
    ///
    /// # Errors
    /// Returns `TransportError` if the part is rejected or the call fails
    async fn upload_part(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> TransportResult<PartReceipt>;

    /// Copy `range` of `source` server-side into one part of the session.
    ///
    /// # Errors
    /// Returns `TransportError` if the copy is rejected or the call fails
    async fn upload_part_copy(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u32,
        source: &ObjectRef,
        range: ByteRange,
    ) -> TransportResult<PartReceipt>;

    /// Read `range` of `object`. Never called with an empty range.
    ///
    /// # Errors
    /// Returns `TransportError` if the read fails
    async fn get_object_range(&self, object: &ObjectRef, range: ByteRange)
    -> TransportResult<Vec<u8>>;

    /// Finalize the session. `parts` is sorted by ascending part number.
    ///
    /// # Errors
    /// Returns `TransportError` if the service rejects the part list
    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<CompleteOutput>;

    /// Discard the session and any parts uploaded into it.
    ///
    /// # Errors
    /// Returns `TransportError` if the abort call fails
    async fn abort_multipart_upload(&self, object: &ObjectRef, upload_id: &str)
    -> TransportResult<()>;
}
