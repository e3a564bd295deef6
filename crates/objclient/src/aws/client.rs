//! An 'ObjectClient' implementation for AWS S3, using the provider's native multipart uploads.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::error;

use crate::aws::api::{
    ApiError, CompleteUploadInput, DeleteTarget, GetObjectInput, ListObjectsInput,
    ListVersionsInput, PutObjectInput, S3Api, SdkApi, UploadPartCopyInput,
};
use crate::client::{
    should_ignore, AbortMultipartUploadOptions, AppendToObjectOptions, BucketStatusOptions,
    CompleteMultipartUploadOptions, CopyObjectOptions, CreateMultipartUploadOptions,
    DeleteDirectoryOptions, DeleteObjectVersionsOptions, DeleteObjectsOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFunc, IterateObjectsOptions, ListPartsOptions,
    ObjectClient, Precondition, PutObjectOptions, SetObjectLockOptions, UploadPartCopyOptions,
    UploadPartOptions,
};
use crate::error::{Error, Result};
use crate::pool::{num_workers, Pool};
use crate::values::{
    read_body, validate_range, BucketLockingStatus, BucketVersioningStatus, ByteRange, LockType,
    Object, ObjectAttrs, Part, Provider,
};

/// The maximum number of keys which may be deleted/listed in a single batched call.
pub const PAGE_SIZE: usize = 1000;

/// The minimum size of a multipart upload part; objects smaller than this cannot be appended to
/// using a part copy.
pub const MIN_UPLOAD_SIZE: u64 = 5 * 1024 * 1024;

/// A client which allows the creation/management of objects stored in AWS S3.
pub struct AwsClient {
    api: Arc<dyn S3Api>,
}

impl AwsClient {
    /// Creates a new client using the given SDK client, in general the one produced by
    /// 'create_client'.
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        AwsClient { api: Arc::new(SdkApi::new(client)) }
    }

    pub(crate) fn with_api(api: Arc<dyn S3Api>) -> Self {
        AwsClient { api }
    }

    /// Appends by downloading the whole object, concatenating the new data, and re-uploading;
    /// used for objects under the minimum part size.
    async fn download_and_append(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<()> {
        let object = self
            .get_object(GetObjectOptions {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await?;

        let existing = read_body(object.body).await?;

        let mut combined = BytesMut::with_capacity(existing.len() + data.len());
        combined.extend_from_slice(&existing);
        combined.extend_from_slice(&data);

        self.put_object(PutObjectOptions {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body: combined.freeze(),
            ..Default::default()
        })
        .await?;

        Ok(())
    }

    /// Appends without re-transmitting the existing object: part one is a server-side copy of
    /// the object, part two is the new data. On failure the upload is aborted; a failed abort is
    /// logged rather than masking the original error.
    async fn copy_and_append(&self, bucket: &str, key: &str, size: u64, data: Bytes) -> Result<()> {
        let id = self
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await?;

        let result = self.copy_then_upload(bucket, &id, key, size, data).await;

        if result.is_ok() {
            return Ok(());
        }

        let abort = self
            .abort_multipart_upload(AbortMultipartUploadOptions {
                bucket: bucket.to_string(),
                upload_id: id.clone(),
                key: key.to_string(),
            })
            .await;

        if abort.is_err() {
            error!(id, key, "failed to abort multipart upload, it should be aborted manually");
        }

        result
    }

    async fn copy_then_upload(
        &self,
        bucket: &str,
        id: &str,
        key: &str,
        size: u64,
        data: Bytes,
    ) -> Result<()> {
        let copied = self
            .upload_part_copy(UploadPartCopyOptions {
                destination_bucket: bucket.to_string(),
                upload_id: id.to_string(),
                destination_key: key.to_string(),
                source_bucket: bucket.to_string(),
                source_key: key.to_string(),
                number: 1,
                byte_range: Some(ByteRange::new(0, size - 1)),
            })
            .await?;

        let appended = self
            .upload_part(UploadPartOptions {
                bucket: bucket.to_string(),
                upload_id: id.to_string(),
                key: key.to_string(),
                number: 2,
                body: data,
            })
            .await?;

        self.complete_multipart_upload(CompleteMultipartUploadOptions {
            bucket: bucket.to_string(),
            upload_id: id.to_string(),
            key: key.to_string(),
            parts: vec![copied, appended],
            ..Default::default()
        })
        .await
    }

    /// Performs a batched delete for a single page (<=1000) of targets; per-key "not found"
    /// failures are filtered out, deleting an absent key is not an error.
    async fn delete_page(
        api: Arc<dyn S3Api>,
        bucket: String,
        targets: Vec<DeleteTarget>,
    ) -> Result<()> {
        let failures = api
            .delete_objects(&bucket, targets)
            .await
            .map_err(|err| handle_error(Some(&bucket), None, err))?;

        for failure in failures {
            if is_key_not_found(failure.code.as_deref()) {
                continue;
            }

            let err =
                ApiError::new(failure.code.as_deref(), failure.message.as_deref().unwrap_or_default());

            return Err(handle_error(Some(&bucket), failure.key.as_deref(), err));
        }

        Ok(())
    }

    /// Deletes the given targets in pages, parallelized with a bounded worker pool.
    async fn delete_targets(&self, bucket: &str, targets: Vec<DeleteTarget>) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let pool = Pool::new(num_workers(targets.len().div_ceil(PAGE_SIZE)));

        for page in targets.chunks(PAGE_SIZE) {
            let (api, bucket, page) = (Arc::clone(&self.api), bucket.to_string(), page.to_vec());

            if pool.queue(Self::delete_page(api, bucket, page)).await.is_err() {
                break;
            }
        }

        pool.stop().await
    }

    /// Deletes everything under the given prefix where versioning is enabled; the current
    /// version of an object must be soft-deleted before its history can be purged, so current
    /// and non-current entries accumulate into separate batches flushed current-first.
    async fn delete_directory_versions(&self, bucket: &str, prefix: &str) -> Result<()> {
        let mut current: Vec<DeleteTarget> = Vec::new();
        let mut noncurrent: Vec<DeleteTarget> = Vec::new();
        let mut markers = None;

        loop {
            let page = self
                .api
                .list_versions_page(ListVersionsInput {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    key_marker: markers.as_ref().map(|(key, _): &(String, String)| key.clone()),
                    version_marker: markers.as_ref().map(|(_, version)| version.clone()),
                    ..Default::default()
                })
                .await
                .map_err(|err| handle_error(Some(bucket), None, err))?;

            for version in page.versions {
                let target = DeleteTarget { key: version.key, version_id: version.version_id };

                if version.is_latest {
                    current.push(target);
                } else {
                    noncurrent.push(target);
                }

                if current.len() >= PAGE_SIZE || noncurrent.len() >= PAGE_SIZE {
                    self.flush_batches(bucket, &mut current, &mut noncurrent).await?;
                }
            }

            markers = page.markers;

            if markers.is_none() {
                break;
            }
        }

        // The final partial batches are always flushed
        self.flush_batches(bucket, &mut current, &mut noncurrent).await
    }

    async fn flush_batches(
        &self,
        bucket: &str,
        current: &mut Vec<DeleteTarget>,
        noncurrent: &mut Vec<DeleteTarget>,
    ) -> Result<()> {
        for batch in [current, noncurrent] {
            if batch.is_empty() {
                continue;
            }

            Self::delete_page(Arc::clone(&self.api), bucket.to_string(), std::mem::take(batch))
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectClient for AwsClient {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let input = GetObjectInput {
            bucket: opts.bucket.clone(),
            key: opts.key.clone(),
            range: opts.byte_range.as_ref().map(ByteRange::to_range_header),
            version_id: opts.version_id,
        };

        let resp = self
            .api
            .get_object(input)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))?;

        let attrs = ObjectAttrs {
            key: opts.key,
            size: resp.size,
            last_modified: resp.last_modified,
            etag: resp.etag,
            version_id: resp.version_id,
            is_current_version: true,
            ..Default::default()
        };

        Ok(Object { attrs, body: resp.body })
    }

    async fn get_object_attrs(&self, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs> {
        let resp = self
            .api
            .head_object(&opts.bucket, &opts.key, opts.version_id.as_deref())
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))?;

        Ok(ObjectAttrs {
            key: opts.key,
            size: resp.size,
            last_modified: resp.last_modified,
            etag: resp.etag,
            version_id: resp.version_id,
            is_current_version: true,
            lock_type: if resp.lock_compliance { LockType::Compliance } else { LockType::Undefined },
            lock_expiration: resp.lock_expiration,
            ..Default::default()
        })
    }

    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        let (if_none_match, if_match) = precondition_flags(opts.precondition.as_ref());
        let size = opts.body.len() as u64;

        let input = PutObjectInput {
            bucket: opts.bucket.clone(),
            key: opts.key.clone(),
            body: opts.body,
            if_none_match,
            if_match,
            lock: opts.lock,
        };

        let resp = self
            .api
            .put_object(input)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))?;

        Ok(ObjectAttrs {
            key: opts.key,
            size: Some(size),
            etag: resp.etag,
            version_id: resp.version_id,
            is_current_version: true,
            ..Default::default()
        })
    }

    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs> {
        let source = format!("{}/{}", opts.source_bucket, opts.source_key);

        let resp = self
            .api
            .copy_object(&opts.destination_bucket, &opts.destination_key, &source)
            .await
            .map_err(|err| {
                handle_error(Some(&opts.destination_bucket), Some(&opts.destination_key), err)
            })?;

        Ok(ObjectAttrs {
            key: opts.destination_key,
            etag: resp.etag,
            version_id: resp.version_id,
            is_current_version: true,
            ..Default::default()
        })
    }

    async fn append_to_object(&self, opts: AppendToObjectOptions) -> Result<()> {
        let attrs = self
            .get_object_attrs(GetObjectAttrsOptions {
                bucket: opts.bucket.clone(),
                key: opts.key.clone(),
                ..Default::default()
            })
            .await;

        let attrs = match attrs {
            Ok(attrs) => attrs,
            // An absent object is created, rather than appended to
            Err(err) if err.is_not_found() => {
                self.put_object(PutObjectOptions {
                    bucket: opts.bucket,
                    key: opts.key,
                    body: opts.body,
                    ..Default::default()
                })
                .await?;

                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let size = attrs.size.unwrap_or_default();

        if size < MIN_UPLOAD_SIZE {
            return self.download_and_append(&opts.bucket, &opts.key, opts.body).await;
        }

        self.copy_and_append(&opts.bucket, &opts.key, size, opts.body).await
    }

    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()> {
        let targets = opts
            .keys
            .into_iter()
            .map(|key| DeleteTarget { key, version_id: None })
            .collect();

        self.delete_targets(&opts.bucket, targets).await
    }

    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()> {
        let targets = opts
            .versions
            .into_iter()
            .map(|version| DeleteTarget { key: version.key, version_id: Some(version.version_id) })
            .collect();

        self.delete_targets(&opts.bucket, targets).await
    }

    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()> {
        if opts.versions {
            return self.delete_directory_versions(&opts.bucket, &opts.prefix).await;
        }

        let mut continuation = None;

        loop {
            let page = self
                .api
                .list_objects_page(ListObjectsInput {
                    bucket: opts.bucket.clone(),
                    prefix: opts.prefix.clone(),
                    continuation,
                    ..Default::default()
                })
                .await
                .map_err(|err| handle_error(Some(&opts.bucket), None, err))?;

            let targets = page
                .objects
                .into_iter()
                .map(|object| DeleteTarget { key: object.key, version_id: None })
                .collect();

            Self::delete_page(Arc::clone(&self.api), opts.bucket.clone(), targets).await?;

            continuation = page.continuation;

            if continuation.is_none() {
                return Ok(());
            }
        }
    }

    async fn iterate_objects(
        &self,
        opts: IterateObjectsOptions,
        func: IterateFunc<'_>,
    ) -> Result<()> {
        if !opts.include.is_empty() && !opts.exclude.is_empty() {
            return Err(Error::IncludeAndExclude);
        }

        let mut run = |attrs: ObjectAttrs| -> Result<()> {
            if should_ignore(&attrs.key, &opts.include, &opts.exclude) {
                return Ok(());
            }

            // A callback error stops iteration and propagates unwrapped
            func(attrs).map_err(Error::Callback)
        };

        if opts.versions {
            let mut markers = None;

            loop {
                let page = self
                    .api
                    .list_versions_page(ListVersionsInput {
                        bucket: opts.bucket.clone(),
                        prefix: opts.prefix.clone(),
                        delimiter: opts.delimiter.clone(),
                        key_marker: markers.as_ref().map(|(key, _): &(String, String)| key.clone()),
                        version_marker: markers.as_ref().map(|(_, version)| version.clone()),
                    })
                    .await
                    .map_err(|err| handle_error(Some(&opts.bucket), None, err))?;

                for prefix in page.common_prefixes {
                    run(ObjectAttrs { key: prefix, ..Default::default() })?;
                }

                for version in page.versions {
                    run(ObjectAttrs {
                        key: version.key,
                        size: version.size,
                        last_modified: version.last_modified,
                        version_id: version.version_id,
                        is_current_version: version.is_latest,
                        is_delete_marker: version.is_delete_marker,
                        ..Default::default()
                    })?;
                }

                markers = page.markers;

                if markers.is_none() {
                    return Ok(());
                }
            }
        }

        let mut continuation = None;

        loop {
            let page = self
                .api
                .list_objects_page(ListObjectsInput {
                    bucket: opts.bucket.clone(),
                    prefix: opts.prefix.clone(),
                    delimiter: opts.delimiter.clone(),
                    continuation,
                })
                .await
                .map_err(|err| handle_error(Some(&opts.bucket), None, err))?;

            for prefix in page.common_prefixes {
                run(ObjectAttrs { key: prefix, ..Default::default() })?;
            }

            for object in page.objects {
                run(ObjectAttrs {
                    key: object.key,
                    size: object.size,
                    last_modified: object.last_modified,
                    is_current_version: true,
                    ..Default::default()
                })?;
            }

            continuation = page.continuation;

            if continuation.is_none() {
                return Ok(());
            }
        }
    }

    async fn create_multipart_upload(&self, opts: CreateMultipartUploadOptions) -> Result<String> {
        self.api
            .create_multipart_upload(&opts.bucket, &opts.key, opts.lock.as_ref())
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))
    }

    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .api
                .list_parts_page(&opts.bucket, &opts.upload_id, &opts.key, marker.as_deref())
                .await;

            let page = match page {
                Ok(page) => page,
                // Surfaced here because some S3-compatible services return a clashing "NotFound"
                Err(err) if is_no_such_upload(err.code()) => {
                    return Err(Error::not_found("upload", &opts.upload_id));
                }
                Err(err) => return Err(handle_error(Some(&opts.bucket), Some(&opts.key), err)),
            };

            parts.extend(
                page.parts.into_iter().map(|(etag, size)| Part { id: etag, size, ..Default::default() }),
            );

            marker = page.marker;

            if marker.is_none() {
                return Ok(parts);
            }
        }
    }

    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part> {
        let size = opts.body.len() as u64;

        let etag = self
            .api
            .upload_part(&opts.bucket, &opts.upload_id, &opts.key, opts.number, opts.body)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))?;

        Ok(Part { id: etag, number: opts.number, size })
    }

    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part> {
        let range = opts.byte_range.ok_or(Error::ByteRangeRequired)?;
        range.validate_closed()?;

        let input = UploadPartCopyInput {
            bucket: opts.destination_bucket.clone(),
            key: opts.destination_key.clone(),
            upload_id: opts.upload_id,
            number: opts.number,
            copy_source: format!("{}/{}", opts.source_bucket, opts.source_key),
            range: range.to_range_header(),
        };

        let etag = self.api.upload_part_copy(input).await.map_err(|err| {
            handle_error(Some(&opts.destination_bucket), Some(&opts.destination_key), err)
        })?;

        Ok(Part { id: etag, number: opts.number, size: range.len().unwrap_or_default() })
    }

    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()> {
        let (if_none_match, if_match) = precondition_flags(opts.precondition.as_ref());

        let input = CompleteUploadInput {
            bucket: opts.bucket.clone(),
            key: opts.key.clone(),
            upload_id: opts.upload_id,
            parts: opts.parts.into_iter().map(|part| (part.id, part.number)).collect(),
            if_none_match,
            if_match,
        };

        self.api
            .complete_multipart_upload(input)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))
    }

    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()> {
        let result = self.api.abort_multipart_upload(&opts.bucket, &opts.upload_id, &opts.key).await;

        match result {
            Ok(()) => Ok(()),
            // Aborting an already-gone upload is treated as success
            Err(err) if is_no_such_upload(err.code()) => Ok(()),
            Err(err) => Err(handle_error(Some(&opts.bucket), Some(&opts.key), err)),
        }
    }

    async fn get_bucket_versioning_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus> {
        let enabled = self
            .api
            .get_bucket_versioning(&opts.bucket)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), None, err))?;

        Ok(BucketVersioningStatus { enabled })
    }

    async fn get_bucket_locking_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus> {
        let result = self.api.get_bucket_locking(&opts.bucket).await;

        match result {
            Ok(enabled) => Ok(BucketLockingStatus { enabled }),
            Err(err) if err.code() == Some("ObjectLockConfigurationNotFoundError") => {
                Ok(BucketLockingStatus { enabled: false })
            }
            Err(err) => Err(handle_error(Some(&opts.bucket), None, err)),
        }
    }

    async fn set_object_lock(&self, opts: SetObjectLockOptions) -> Result<()> {
        if opts.lock.lock_type != LockType::Compliance {
            return Err(Error::UnsupportedLockType);
        }

        self.api
            .put_object_retention(&opts.bucket, &opts.key, opts.version_id.as_deref(), &opts.lock)
            .await
            .map_err(|err| handle_error(Some(&opts.bucket), Some(&opts.key), err))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn precondition_flags(precondition: Option<&Precondition>) -> (bool, Option<String>) {
    match precondition {
        Some(Precondition::OnlyIfAbsent) => (true, None),
        Some(Precondition::IfMatch(etag)) => (false, Some(etag.clone())),
        None => (false, None),
    }
}

/// Converts an S3 error into a user friendly error where possible; unmapped errors pass through
/// unchanged rather than being swallowed.
fn handle_error(bucket: Option<&str>, key: Option<&str>, err: ApiError) -> Error {
    if err.unreachable {
        return Error::EndpointUnreachable;
    }

    match err.code() {
        Some("InvalidAccessKeyId") | Some("SignatureDoesNotMatch") => Error::Unauthenticated,
        Some("AccessDenied") => Error::Unauthorized,
        Some("NoSuchKey") | Some("NotFound") => Error::not_found("key", key.unwrap_or_default()),
        Some("NoSuchBucket") => Error::not_found("bucket", bucket.unwrap_or_default()),
        Some("NoSuchUpload") => Error::not_found("upload", key.unwrap_or_default()),
        Some("PreconditionFailed") => {
            Error::PreconditionFailed { key: key.unwrap_or_default().to_string() }
        }
        Some("InvalidObjectState") => {
            Error::ArchiveStorage { key: key.unwrap_or_default().to_string() }
        }
        _ => Error::Provider { provider: Provider::Aws, source: Box::new(err) },
    }
}

/// Returns whether the given error code means the key being operated on did not exist.
fn is_key_not_found(code: Option<&str>) -> bool {
    matches!(code, Some("NoSuchKey") | Some("NotFound"))
}

/// Returns whether the given error code means the upload being operated on did not exist.
fn is_no_such_upload(code: Option<&str>) -> bool {
    matches!(code, Some("NoSuchUpload") | Some("NotFound"))
}
