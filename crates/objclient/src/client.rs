//! The unified client contract all call sites program against.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;

use crate::error::{BoxError, Result};
use crate::values::{
    BucketLockingStatus, BucketVersioningStatus, ByteRange, Object, ObjectAttrs, ObjectLock,
    ObjectVersion, Part, Provider,
};

/// The upload id used by clients for cloud providers which do not have upload sessions.
///
/// NOTE: A deliberately distinguishable value rather than an empty string, to avoid confusion
/// with an id which simply hasn't been set yet.
pub const NO_UPLOAD_ID: &str = "<no-upload-id>";

/// The part number used by clients for cloud providers which do not need numbers to order parts.
pub const NO_PART_NUMBER: u16 = 0;

/// A precondition applied to a write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Only perform the write if the object does not already exist.
    OnlyIfAbsent,
    /// Only perform the write if the object's current CAS token (ETag/generation) matches.
    IfMatch(String),
}

/// Options for 'get_object'.
#[derive(Debug, Clone, Default)]
pub struct GetObjectOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// An optional start/end offset to be operated on.
    pub byte_range: Option<ByteRange>,
    /// An optional version of the object, where bucket versioning is enabled.
    pub version_id: Option<String>,
}

/// Options for 'get_object_attrs'.
#[derive(Debug, Clone, Default)]
pub struct GetObjectAttrsOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// An optional version of the object, where bucket versioning is enabled.
    pub version_id: Option<String>,
}

/// Options for 'put_object'.
#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// The data that will be uploaded.
    ///
    /// NOTE: Held in memory so the provider's preferred integrity checksum can be computed
    /// before transmission.
    pub body: Bytes,
    /// An optional precondition for the write.
    pub precondition: Option<Precondition>,
    /// An optional lock applied to the object at write time.
    pub lock: Option<ObjectLock>,
}

/// Options for 'copy_object'.
#[derive(Debug, Clone, Default)]
pub struct CopyObjectOptions {
    /// The bucket that will be copied into.
    pub destination_bucket: String,
    /// The key for the copied object.
    pub destination_key: String,
    /// The bucket containing the object being copied.
    pub source_bucket: String,
    /// The key of the object being copied.
    pub source_key: String,
}

/// Options for 'append_to_object'.
#[derive(Debug, Clone, Default)]
pub struct AppendToObjectOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// The data that will be appended.
    pub body: Bytes,
}

/// Options for 'delete_objects'.
#[derive(Debug, Clone, Default)]
pub struct DeleteObjectsOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The keys that will be deleted.
    pub keys: Vec<String>,
}

/// Options for 'delete_object_versions'.
#[derive(Debug, Clone, Default)]
pub struct DeleteObjectVersionsOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The object versions that will be deleted.
    pub versions: Vec<ObjectVersion>,
}

/// Options for 'delete_directory'.
#[derive(Debug, Clone, Default)]
pub struct DeleteDirectoryOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The prefix that will be operated on.
    pub prefix: String,
    /// Whether to also delete historical versions and delete markers.
    pub versions: bool,
}

/// Options for 'iterate_objects'.
#[derive(Debug, Clone, Default)]
pub struct IterateObjectsOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The prefix that will be listed.
    pub prefix: String,
    /// A delimiter used to group keys, e.g. '/' causes listing to only occur within a
    /// "directory".
    pub delimiter: Option<String>,
    /// Only include objects whose key (or basename) matches one of these expressions.
    ///
    /// NOTE: Mutually exclusive with 'exclude'.
    pub include: Vec<Regex>,
    /// Exclude objects whose key (or basename) matches one of these expressions.
    ///
    /// NOTE: Mutually exclusive with 'include'.
    pub exclude: Vec<Regex>,
    /// Whether to also list historical versions and delete markers.
    pub versions: bool,
}

/// The function executed for each object listed by 'iterate_objects'; returning an error stops
/// iteration, and that error propagates to the caller unwrapped.
pub type IterateFunc<'a> =
    &'a mut (dyn FnMut(ObjectAttrs) -> std::result::Result<(), BoxError> + Send);

/// Options for 'create_multipart_upload'.
#[derive(Debug, Clone, Default)]
pub struct CreateMultipartUploadOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// An optional lock applied to the completed object.
    pub lock: Option<ObjectLock>,
}

/// Options for 'list_parts'.
#[derive(Debug, Clone, Default)]
pub struct ListPartsOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The id of the upload being operated on.
    pub upload_id: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
}

/// Options for 'upload_part'.
#[derive(Debug, Clone, Default)]
pub struct UploadPartOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The id of the upload being operated on.
    pub upload_id: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// The 1-10,000 number that will be assigned to the part, used for ordering upon completion.
    pub number: u16,
    /// The data that will be uploaded.
    pub body: Bytes,
}

/// Options for 'upload_part_copy'.
#[derive(Debug, Clone, Default)]
pub struct UploadPartCopyOptions {
    /// The bucket that will be copied into.
    pub destination_bucket: String,
    /// The id of the upload being operated on.
    pub upload_id: String,
    /// The key for the copied part.
    pub destination_key: String,
    /// The bucket containing the object being copied.
    pub source_bucket: String,
    /// The key of the object being copied.
    pub source_key: String,
    /// The 1-10,000 number that will be assigned to the part.
    pub number: u16,
    /// An optional start/end offset to copy.
    ///
    /// NOTE: Not supported by all cloud providers.
    pub byte_range: Option<ByteRange>,
}

/// Options for 'complete_multipart_upload'.
#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartUploadOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The id of the upload being operated on.
    pub upload_id: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// The parts the completed object should be constructed from, in order.
    pub parts: Vec<Part>,
    /// An optional precondition for the write.
    pub precondition: Option<Precondition>,
    /// An optional lock applied to the completed object.
    pub lock: Option<ObjectLock>,
}

/// Options for 'abort_multipart_upload'.
#[derive(Debug, Clone, Default)]
pub struct AbortMultipartUploadOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The id of the upload being operated on.
    pub upload_id: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
}

/// Options for 'get_bucket_versioning_status'/'get_bucket_locking_status'.
#[derive(Debug, Clone, Default)]
pub struct BucketStatusOptions {
    /// The bucket being operated on.
    pub bucket: String,
}

/// Options for 'set_object_lock'.
#[derive(Debug, Clone)]
pub struct SetObjectLockOptions {
    /// The bucket being operated on.
    pub bucket: String,
    /// The key (path) of the object/blob being operated on.
    pub key: String,
    /// An optional version of the object, where bucket versioning is enabled.
    pub version_id: Option<String>,
    /// The lock to apply.
    pub lock: ObjectLock,
}

/// A unified interface for accessing/managing objects stored in the cloud.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Returns the cloud provider this client is interfacing with.
    ///
    /// NOTE: This may be used to change high level behavior which is cloud provider specific,
    /// e.g. byte range part copies are unsupported on GCP.
    fn provider(&self) -> Provider;

    /// Retrieves an object from the cloud; an optional byte range causes only the requested
    /// bytes to be returned.
    ///
    /// Fails with a not-found error if the object is absent.
    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object>;

    /// Returns general metadata about the object with the given key, without its body.
    async fn get_object_attrs(&self, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs>;

    /// Creates an object in the cloud with the given key/options.
    ///
    /// The provider's preferred integrity checksum is computed and transmitted rather than
    /// trusting the transport.
    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs>;

    /// Copies an object from one location to another, possibly within the same bucket.
    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs>;

    /// Appends the provided data to the object with the given key; a binary concatenation.
    ///
    /// NOTE: If the given object does not already exist, it will be created.
    async fn append_to_object(&self, opts: AppendToObjectOptions) -> Result<()>;

    /// Deletes all the objects with the given keys, ignoring keys which are not found.
    ///
    /// NOTE: Operations may be batched into pages depending on provider support.
    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()>;

    /// Deletes the given object versions, ignoring versions which are not found.
    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()>;

    /// Deletes all the objects which have the given prefix.
    ///
    /// Fails without deleting anything if an object in the prefix is under an unexpired
    /// retention lock.
    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()>;

    /// Iterates through the objects in a bucket, running the provided function for each object
    /// matching the given filters.
    async fn iterate_objects(
        &self,
        opts: IterateObjectsOptions,
        func: IterateFunc<'_>,
    ) -> Result<()>;

    /// Creates a new multipart upload for the given key, returning its upload id.
    ///
    /// NOTE: Not all providers support multipart uploads directly; the interface should be used
    /// as if they do, the client handles any nuances.
    async fn create_multipart_upload(&self, opts: CreateMultipartUploadOptions) -> Result<String>;

    /// Returns the list of parts staged or uploaded for the given upload id/key pair.
    ///
    /// NOTE: The returned parts will not have their part number populated, it is not stored by
    /// all cloud providers.
    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>>;

    /// Creates/uploads a new part for the multipart upload with the given id.
    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part>;

    /// Creates a new part for the multipart upload from an existing object, or part of one.
    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part>;

    /// Completes the multipart upload with the given id; parts are constructed in the given
    /// order, and all intermediates are removed.
    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()>;

    /// Aborts the multipart upload with the given id, cleaning up any abandoned parts.
    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()>;

    /// Returns whether versioning is enabled for the given bucket.
    async fn get_bucket_versioning_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus>;

    /// Returns whether object locking is enabled for the given bucket.
    async fn get_bucket_locking_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus>;

    /// Sets a lock on the given object (or object version) retroactively.
    async fn set_object_lock(&self, opts: SetObjectLockOptions) -> Result<()>;

    /// Releases any resources held by the underlying SDK; use of the client after a call to
    /// 'close' has undefined behavior.
    async fn close(&self) -> Result<()>;
}

/// Returns whether the given key should be skipped during iteration, according to the provided
/// include/exclude filters; expressions are matched against the full key and its basename.
pub fn should_ignore(key: &str, include: &[Regex], exclude: &[Regex]) -> bool {
    let matches = |regexes: &[Regex]| {
        regexes.iter().any(|re| re.is_match(key) || re.is_match(basename(key)))
    };

    (!include.is_empty() && !matches(include)) || (!exclude.is_empty() && matches(exclude))
}

/// Returns whether the given attributes carry a retention lock which has not yet expired; such
/// objects block a directory delete.
pub(crate) fn under_retention(attrs: &ObjectAttrs, now: chrono::DateTime<chrono::Utc>) -> bool {
    attrs.lock_type == crate::values::LockType::Compliance
        && attrs.lock_expiration.is_some_and(|expiration| expiration > now)
}

/// Returns the final path component of the given key.
pub(crate) fn basename(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or(key)
}

/// Returns the leading path components of the given key, without a trailing slash; empty when
/// the key has no directory component.
pub(crate) fn dirname(key: &str) -> &str {
    match key.trim_end_matches('/').rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_ignore_includes_match_basename() {
        let include = vec![Regex::new("^key1$").unwrap()];

        assert!(!should_ignore("/a/key1", &include, &[]));
        assert!(!should_ignore("/b/key1", &include, &[]));
        assert!(should_ignore("/a/key2", &include, &[]));
    }

    #[test]
    fn should_ignore_excludes_match_full_key() {
        let exclude = vec![Regex::new("^backups/").unwrap()];

        assert!(should_ignore("backups/2024/manifest.json", &[], &exclude));
        assert!(!should_ignore("data/2024/manifest.json", &[], &exclude));
    }

    #[test]
    fn should_ignore_no_filters_keeps_everything() {
        assert!(!should_ignore("anything/at/all", &[], &[]));
    }

    #[test]
    fn basename_and_dirname() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
        assert_eq!(dirname("a/b/c.txt"), "a/b");
        assert_eq!(dirname("c.txt"), "");
    }
}
