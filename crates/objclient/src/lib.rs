//! Provider-Agnostic Object Storage Client
//!
//! This crate provides a unified interface for accessing and managing objects stored in
//! AWS S3, Azure Blob Storage and Google Cloud Storage, normalizing each provider's
//! primitives (native multipart, block staging, client-side composition) behind one
//! contract.

pub(crate) mod api;
pub mod aws;
pub mod azure;
pub mod client;
pub mod config;
pub mod error;
pub mod gcp;
pub mod memory;
pub mod pool;
pub mod ratelimit;
pub mod values;

pub use aws::AwsClient;
pub use azure::AzureClient;
pub use client::{
    should_ignore, AbortMultipartUploadOptions, AppendToObjectOptions, BucketStatusOptions,
    CompleteMultipartUploadOptions, CopyObjectOptions, CreateMultipartUploadOptions,
    DeleteDirectoryOptions, DeleteObjectVersionsOptions, DeleteObjectsOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFunc, IterateObjectsOptions, ListPartsOptions,
    ObjectClient, Precondition, PutObjectOptions, SetObjectLockOptions, UploadPartCopyOptions,
    UploadPartOptions, NO_PART_NUMBER, NO_UPLOAD_ID,
};
pub use config::{create_client, ClientConfig};
pub use error::{BoxError, Error, Result};
pub use gcp::GcpClient;
pub use memory::MemoryClient;
pub use pool::{num_workers, Pool};
pub use ratelimit::{rate_limited_body, RateLimitedClient, RateLimiter};
pub use values::{
    read_body, BucketLockingStatus, BucketVersioningStatus, ByteRange, LockType, Object,
    ObjectAttrs, ObjectBody, ObjectLock, ObjectVersion, Part, Provider,
};
