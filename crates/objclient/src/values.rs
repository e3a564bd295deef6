//! Value types shared by all cloud provider clients.

use std::fmt;
use std::io;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A cloud provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Amazon Web Services (S3).
    Aws,
    /// Microsoft Azure (Blob Storage).
    Azure,
    /// Google Cloud Platform (Cloud Storage).
    Gcp,
}

impl Provider {
    /// Returns the URL scheme commonly used to address objects for this provider.
    pub fn to_scheme(self) -> &'static str {
        match self {
            Provider::Aws => "s3://",
            Provider::Azure => "az://",
            Provider::Gcp => "gs://",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Aws => write!(f, "AWS"),
            Provider::Azure => write!(f, "Azure"),
            Provider::Gcp => write!(f, "GCP"),
        }
    }
}

/// The type of lock attached to an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    /// No lock, or a lock mode we don't interpret.
    #[default]
    Undefined,
    /// A 'compliance' retention lock; the object may not be deleted or modified until the lock
    /// expires, by anybody.
    Compliance,
}

/// An object lock applied at write time, or retroactively via 'set_object_lock'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLock {
    /// The type of the lock.
    pub lock_type: LockType,
    /// The time the lock period expires.
    pub expiration: DateTime<Utc>,
}

impl ObjectLock {
    /// Creates a new 'compliance' mode object lock expiring at the given time.
    pub fn new_compliance(expiration: DateTime<Utc>) -> Self {
        ObjectLock { lock_type: LockType::Compliance, expiration }
    }
}

/// The attributes usually attached to an object in the cloud.
///
/// Attributes are produced by read/list/head operations and are never mutated, only replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// The identifier for the object; a unique path.
    pub key: String,

    /// The size or content length of the object in bytes.
    ///
    /// NOTE: May be conditionally populated, for example chunked responses omit it.
    pub size: Option<u64>,

    /// The time the object was last updated (or created). The exact semantics differ between
    /// cloud providers, e.g. a metadata change may bump the last modified time.
    pub last_modified: Option<DateTime<Utc>>,

    /// The HTTP entity tag for the object; each provider uses this differently, with different
    /// rules applying to multipart uploads.
    ///
    /// NOTE: Not populated during object iteration.
    pub etag: Option<String>,

    /// The unique version of the object, where bucket versioning is enabled. The encoding is
    /// provider specific, for GCP it's a decimal generation number.
    pub version_id: Option<String>,

    /// Whether this is the version returned by version-unaware reads.
    pub is_current_version: bool,

    /// Whether this entry is a placeholder created by a versioned delete, hiding (without
    /// erasing) the current version.
    pub is_delete_marker: bool,

    /// The type of lock attached to the object, if any.
    pub lock_type: LockType,

    /// The time any attached lock expires.
    pub lock_expiration: Option<DateTime<Utc>>,
}

impl ObjectAttrs {
    /// Returns whether these attributes represent a synthetic directory, created when iterating
    /// objects using a delimiter; only the key is populated for such entries.
    pub fn is_dir(&self) -> bool {
        self.size.is_none() && self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A streamed object body; read it to completion or drop it, the core never buffers it.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// Reads a streamed object body fully into memory.
pub async fn read_body(body: ObjectBody) -> io::Result<Bytes> {
    use futures::TryStreamExt;

    let chunks: Vec<Bytes> = body.try_collect().await?;

    Ok(chunks.concat().into())
}

/// An object stored in the cloud; its attributes and body.
pub struct Object {
    /// General metadata about the object.
    pub attrs: ObjectAttrs,

    /// The object data; depending on the request this may only be a byte range of the object.
    pub body: ObjectBody,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object").field("attrs", &self.attrs).finish_non_exhaustive()
    }
}

/// An inclusive byte range of an object, in the HTTP range header sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// The first byte offset, inclusive.
    pub start: u64,
    /// The final byte offset, inclusive; open-ended ("to the end of the object") when absent.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Creates a new closed byte range.
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end: Some(end) }
    }

    /// Creates a new open-ended byte range starting at the given offset.
    pub fn from_offset(start: u64) -> Self {
        ByteRange { start, end: None }
    }

    /// Returns an error if the byte range is invalid.
    ///
    /// Validation runs before any network call is made.
    pub fn validate(&self) -> Result<()> {
        match self.end {
            Some(end) if end < self.start => {
                Err(Error::InvalidByteRange { start: self.start, end })
            }
            _ => Ok(()),
        }
    }

    /// Returns an error unless the range is valid and closed; part copies may not be open-ended.
    pub fn validate_closed(&self) -> Result<()> {
        self.validate()?;

        match self.end {
            Some(_) => Ok(()),
            None => Err(Error::ClosedByteRangeRequired),
        }
    }

    /// Returns the number of bytes covered by the range, where known; saturates at 'u64::MAX'
    /// for a range ending on the final addressable byte.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start).saturating_add(1))
    }

    /// Returns whether the range covers zero bytes; always false for a valid range.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns the HTTP range header representation of this byte range.
    pub fn to_range_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Returns the (offset, length) representation of this byte range; a length of 'None' means
    /// "count to the end of the object".
    pub fn to_offset_length(&self) -> (u64, Option<u64>) {
        (self.start, self.len())
    }
}

/// Validates an optional byte range, failing if 'required' and no range was provided.
pub(crate) fn validate_range(range: Option<&ByteRange>, required: bool) -> Result<()> {
    match range {
        Some(range) => range.validate(),
        None if required => Err(Error::ByteRangeRequired),
        None => Ok(()),
    }
}

/// A single part of an in-progress multipart upload.
///
/// Parts are ephemeral: created by 'upload_part'/'upload_part_copy', consumed exactly once by
/// 'complete_multipart_upload' and destroyed (or garbage collected by the provider) afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    /// An opaque, provider specific identifier: an ETag for AWS, a base64 block id for Azure or
    /// an intermediate object key for GCP.
    pub id: String,

    /// The 1-10,000 number used to order parts upon completion.
    ///
    /// NOTE: Only AWS requires part numbers, use 'NO_PART_NUMBER' elsewhere.
    pub number: u16,

    /// The size of the part in bytes.
    pub size: u64,
}

/// A key/version pair identifying a single version of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    /// The key of the object.
    pub key: String,
    /// The version being identified.
    pub version_id: String,
}

/// Whether versioning is enabled for a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketVersioningStatus {
    pub enabled: bool,
}

/// Whether object locking is enabled for a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketLockingStatus {
    pub enabled: bool,
}
