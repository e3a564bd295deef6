//! The minimal subset of the AWS SDK surface used by the client; depending on a narrow trait
//! rather than the concrete SDK client greatly reduces the surface area for test doubles.

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier,
    ObjectLockEnabled, ObjectLockMode, ObjectLockRetention, ObjectLockRetentionMode,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

pub(crate) use crate::api::{ApiError, ApiResult};
use crate::values::{ObjectBody, ObjectLock};

impl ApiError {
    fn from_sdk<E>(err: SdkError<E>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let code = ProvideErrorMetadata::code(&err).map(str::to_string);
        let message =
            ProvideErrorMetadata::message(&err).map(str::to_string).unwrap_or_else(|| err.to_string());
        let unreachable = matches!(err, SdkError::DispatchFailure(_));

        ApiError { code, message, unreachable, source: Some(Box::new(err)) }
    }

    fn from_build(err: aws_sdk_s3::error::BuildError) -> Self {
        ApiError { code: None, message: err.to_string(), unreachable: false, source: Some(Box::new(err)) }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GetObjectInput {
    pub bucket: String,
    pub key: String,
    pub range: Option<String>,
    pub version_id: Option<String>,
}

pub(crate) struct GetObjectOutput {
    pub body: ObjectBody,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct HeadObjectOutput {
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub lock_compliance: bool,
    pub lock_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub if_none_match: bool,
    pub if_match: Option<String>,
    pub lock: Option<ObjectLock>,
}

#[derive(Debug, Default)]
pub(crate) struct WriteObjectOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// A key plus an optional version, identifying an entry in a batched delete.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeleteTarget {
    pub key: String,
    pub version_id: Option<String>,
}

/// A per-key failure inside an otherwise successful batched delete response.
#[derive(Debug, Default)]
pub(crate) struct DeleteFailure {
    pub key: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListObjectsInput {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListedObject {
    pub key: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct ListObjectsPage {
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ListedObject>,
    pub continuation: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListVersionsInput {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub key_marker: Option<String>,
    pub version_marker: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListedVersion {
    pub key: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
    pub is_latest: bool,
    pub is_delete_marker: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ListVersionsPage {
    pub common_prefixes: Vec<String>,
    pub versions: Vec<ListedVersion>,
    pub markers: Option<(String, String)>,
}

#[derive(Debug, Default)]
pub(crate) struct ListPartsPage {
    pub parts: Vec<(String, u64)>,
    pub marker: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct UploadPartCopyInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub number: u16,
    pub copy_source: String,
    pub range: String,
}

#[derive(Debug, Default)]
pub(crate) struct CompleteUploadInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// (etag, part number) pairs in completion order.
    pub parts: Vec<(String, u16)>,
    pub if_none_match: bool,
    pub if_match: Option<String>,
}

/// The S3 operations the client is implemented in terms of.
#[async_trait]
pub(crate) trait S3Api: Send + Sync {
    async fn get_object(&self, input: GetObjectInput) -> ApiResult<GetObjectOutput>;

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> ApiResult<HeadObjectOutput>;

    async fn put_object(&self, input: PutObjectInput) -> ApiResult<WriteObjectOutput>;

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        copy_source: &str,
    ) -> ApiResult<WriteObjectOutput>;

    /// Performs a batched delete for a single page (<=1000) of targets; per-key failures are
    /// returned, not raised.
    async fn delete_objects(
        &self,
        bucket: &str,
        targets: Vec<DeleteTarget>,
    ) -> ApiResult<Vec<DeleteFailure>>;

    async fn list_objects_page(&self, input: ListObjectsInput) -> ApiResult<ListObjectsPage>;

    async fn list_versions_page(&self, input: ListVersionsInput) -> ApiResult<ListVersionsPage>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        lock: Option<&ObjectLock>,
    ) -> ApiResult<String>;

    async fn list_parts_page(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
        marker: Option<&str>,
    ) -> ApiResult<ListPartsPage>;

    /// Uploads a part, returning its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
        number: u16,
        body: Bytes,
    ) -> ApiResult<String>;

    /// Copies a byte range of an existing object into a part, returning the part's ETag.
    async fn upload_part_copy(&self, input: UploadPartCopyInput) -> ApiResult<String>;

    async fn complete_multipart_upload(&self, input: CompleteUploadInput) -> ApiResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
    ) -> ApiResult<()>;

    async fn get_bucket_versioning(&self, bucket: &str) -> ApiResult<bool>;

    async fn get_bucket_locking(&self, bucket: &str) -> ApiResult<bool>;

    async fn put_object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        lock: &ObjectLock,
    ) -> ApiResult<()>;
}

/// The 'S3Api' implementation backed by the concrete SDK client.
pub(crate) struct SdkApi {
    client: aws_sdk_s3::Client,
}

impl SdkApi {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        SdkApi { client }
    }
}

fn to_chrono(datetime: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(datetime.secs(), datetime.subsec_nanos())
}

fn to_smithy(datetime: DateTime<Utc>) -> aws_sdk_s3::primitives::DateTime {
    aws_sdk_s3::primitives::DateTime::from_secs(datetime.timestamp())
}

#[async_trait]
impl S3Api for SdkApi {
    async fn get_object(&self, input: GetObjectInput) -> ApiResult<GetObjectOutput> {
        let resp = self
            .client
            .get_object()
            .bucket(input.bucket)
            .key(input.key)
            .set_range(input.range)
            .set_version_id(input.version_id)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(GetObjectOutput {
            size: resp.content_length.and_then(|length| u64::try_from(length).ok()),
            last_modified: resp.last_modified.as_ref().and_then(to_chrono),
            etag: resp.e_tag.clone(),
            version_id: resp.version_id.clone(),
            body: ReaderStream::new(resp.body.into_async_read()).boxed(),
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> ApiResult<HeadObjectOutput> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(HeadObjectOutput {
            size: resp.content_length.and_then(|length| u64::try_from(length).ok()),
            last_modified: resp.last_modified.as_ref().and_then(to_chrono),
            etag: resp.e_tag,
            version_id: resp.version_id,
            lock_compliance: resp.object_lock_mode == Some(ObjectLockMode::Compliance),
            lock_expiration: resp.object_lock_retain_until_date.as_ref().and_then(to_chrono),
        })
    }

    async fn put_object(&self, input: PutObjectInput) -> ApiResult<WriteObjectOutput> {
        let mut request = self
            .client
            .put_object()
            .bucket(input.bucket)
            .key(input.key)
            .body(ByteStream::from(input.body))
            .checksum_algorithm(ChecksumAlgorithm::Crc32)
            .set_if_match(input.if_match);

        if input.if_none_match {
            request = request.if_none_match("*");
        }

        if let Some(lock) = &input.lock {
            request = request
                .object_lock_mode(ObjectLockMode::Compliance)
                .object_lock_retain_until_date(to_smithy(lock.expiration));
        }

        let resp = request.send().await.map_err(ApiError::from_sdk)?;

        Ok(WriteObjectOutput { etag: resp.e_tag, version_id: resp.version_id })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        copy_source: &str,
    ) -> ApiResult<WriteObjectOutput> {
        let resp = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(WriteObjectOutput {
            etag: resp.copy_object_result.and_then(|result| result.e_tag),
            version_id: resp.version_id,
        })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        targets: Vec<DeleteTarget>,
    ) -> ApiResult<Vec<DeleteFailure>> {
        let objects = targets
            .into_iter()
            .map(|target| {
                ObjectIdentifier::builder()
                    .key(target.key)
                    .set_version_id(target.version_id)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::from_build)?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(ApiError::from_build)?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        let failures = resp
            .errors()
            .iter()
            .map(|err| DeleteFailure {
                key: err.key().map(str::to_string),
                code: err.code().map(str::to_string),
                message: err.message().map(str::to_string),
            })
            .collect();

        Ok(failures)
    }

    async fn list_objects_page(&self, input: ListObjectsInput) -> ApiResult<ListObjectsPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(input.bucket)
            .prefix(input.prefix)
            .set_delimiter(input.delimiter)
            .set_continuation_token(input.continuation)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|prefix| prefix.prefix().map(str::to_string))
            .collect();

        let objects = resp
            .contents()
            .iter()
            .map(|object| ListedObject {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().and_then(|size| u64::try_from(size).ok()),
                last_modified: object.last_modified().and_then(to_chrono),
            })
            .collect();

        Ok(ListObjectsPage { common_prefixes, objects, continuation: resp.next_continuation_token })
    }

    async fn list_versions_page(&self, input: ListVersionsInput) -> ApiResult<ListVersionsPage> {
        let resp = self
            .client
            .list_object_versions()
            .bucket(input.bucket)
            .prefix(input.prefix)
            .set_delimiter(input.delimiter)
            .set_key_marker(input.key_marker)
            .set_version_id_marker(input.version_marker)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|prefix| prefix.prefix().map(str::to_string))
            .collect();

        let mut versions: Vec<ListedVersion> = resp
            .versions()
            .iter()
            .map(|version| ListedVersion {
                key: version.key().unwrap_or_default().to_string(),
                size: version.size().and_then(|size| u64::try_from(size).ok()),
                last_modified: version.last_modified().and_then(to_chrono),
                version_id: version.version_id().map(str::to_string),
                is_latest: version.is_latest().unwrap_or_default(),
                is_delete_marker: false,
            })
            .collect();

        versions.extend(resp.delete_markers().iter().map(|marker| ListedVersion {
            key: marker.key().unwrap_or_default().to_string(),
            size: None,
            last_modified: marker.last_modified().and_then(to_chrono),
            version_id: marker.version_id().map(str::to_string),
            is_latest: marker.is_latest().unwrap_or_default(),
            is_delete_marker: true,
        }));

        let markers = match (resp.next_key_marker, resp.next_version_id_marker) {
            (Some(key), Some(version)) => Some((key, version)),
            _ => None,
        };

        Ok(ListVersionsPage { common_prefixes, versions, markers })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        lock: Option<&ObjectLock>,
    ) -> ApiResult<String> {
        let mut request = self.client.create_multipart_upload().bucket(bucket).key(key);

        if let Some(lock) = lock {
            request = request
                .object_lock_mode(ObjectLockMode::Compliance)
                .object_lock_retain_until_date(to_smithy(lock.expiration));
        }

        let resp = request.send().await.map_err(ApiError::from_sdk)?;

        Ok(resp.upload_id.unwrap_or_default())
    }

    async fn list_parts_page(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
        marker: Option<&str>,
    ) -> ApiResult<ListPartsPage> {
        let resp = self
            .client
            .list_parts()
            .bucket(bucket)
            .upload_id(upload_id)
            .key(key)
            .set_part_number_marker(marker.map(str::to_string))
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        let parts = resp
            .parts()
            .iter()
            .filter_map(|part| {
                part.e_tag().map(|etag| {
                    (etag.to_string(), part.size().and_then(|size| u64::try_from(size).ok()).unwrap_or_default())
                })
            })
            .collect();

        let marker = match resp.is_truncated {
            Some(true) => resp.next_part_number_marker,
            _ => None,
        };

        Ok(ListPartsPage { parts, marker })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
        number: u16,
        body: Bytes,
    ) -> ApiResult<String> {
        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .upload_id(upload_id)
            .key(key)
            .part_number(i32::from(number))
            .content_length(body.len() as i64)
            .checksum_algorithm(ChecksumAlgorithm::Crc32)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(resp.e_tag.unwrap_or_default())
    }

    async fn upload_part_copy(&self, input: UploadPartCopyInput) -> ApiResult<String> {
        let resp = self
            .client
            .upload_part_copy()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .part_number(i32::from(input.number))
            .copy_source(input.copy_source)
            .copy_source_range(input.range)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(resp.copy_part_result.and_then(|result| result.e_tag).unwrap_or_default())
    }

    async fn complete_multipart_upload(&self, input: CompleteUploadInput) -> ApiResult<()> {
        let parts = input
            .parts
            .into_iter()
            .map(|(etag, number)| {
                CompletedPart::builder().e_tag(etag).part_number(i32::from(number)).build()
            })
            .collect();

        let upload = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();

        let mut request = self
            .client
            .complete_multipart_upload()
            .bucket(input.bucket)
            .key(input.key)
            .upload_id(input.upload_id)
            .multipart_upload(upload)
            .set_if_match(input.if_match);

        if input.if_none_match {
            request = request.if_none_match("*");
        }

        request.send().await.map_err(ApiError::from_sdk)?;

        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
    ) -> ApiResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .upload_id(upload_id)
            .key(key)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> ApiResult<bool> {
        let resp = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(resp.status == Some(aws_sdk_s3::types::BucketVersioningStatus::Enabled))
    }

    async fn get_bucket_locking(&self, bucket: &str) -> ApiResult<bool> {
        let resp = self
            .client
            .get_object_lock_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        let enabled = resp
            .object_lock_configuration()
            .is_some_and(|config| config.object_lock_enabled() == Some(&ObjectLockEnabled::Enabled));

        Ok(enabled)
    }

    async fn put_object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        lock: &ObjectLock,
    ) -> ApiResult<()> {
        let retention = ObjectLockRetention::builder()
            .mode(ObjectLockRetentionMode::Compliance)
            .retain_until_date(to_smithy(lock.expiration))
            .build();

        self.client
            .put_object_retention()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .retention(retention)
            .send()
            .await
            .map_err(ApiError::from_sdk)?;

        Ok(())
    }
}
