//! The minimal subset of the Google Cloud Storage SDK surface used by the client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use google_cloud_storage::client::Client;
use google_cloud_storage::http::buckets::get::GetBucketRequest;
use google_cloud_storage::http::objects::compose::{ComposeObjectRequest, ComposingTargets};
use google_cloud_storage::http::objects::copy::CopyObjectRequest;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range as DownloadRange;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{UploadObjectRequest, UploadType};
use google_cloud_storage::http::objects::{Object as GcsObject, SourceObjects};
use google_cloud_storage::http::Error as GcsError;
use time::OffsetDateTime;

pub(crate) use crate::api::{ApiError, ApiResult};
use crate::values::{ByteRange, ObjectBody};

impl ApiError {
    fn from_gcp(err: GcsError) -> Self {
        let (code, unreachable) = match &err {
            GcsError::Response(resp) => (Some(resp.code.to_string()), false),
            GcsError::HttpClient(inner) => (None, inner.is_connect() || inner.is_timeout()),
            _ => (None, false),
        };

        ApiError { code, message: err.to_string(), unreachable, source: Some(Box::new(err)) }
    }
}

/// The metadata of a stored object; a 'generation' of zero means the service did not report one.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectMeta {
    pub key: String,
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub generation: i64,
    /// When this generation was soft-deleted; absent for the live version.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the bucket's retention policy stops protecting this object; absent when
    /// unprotected.
    pub retention_expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct ReadObjectInput {
    pub bucket: String,
    pub key: String,
    pub generation: Option<i64>,
    pub range: Option<ByteRange>,
}

pub(crate) struct ReadObjectOutput {
    pub body: ObjectBody,
    pub meta: ObjectMeta,
}

#[derive(Debug, Default)]
pub(crate) struct WriteObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    /// Write only if the live generation matches; zero means "only if absent".
    pub if_generation_match: Option<i64>,
}

#[derive(Debug, Default)]
pub(crate) struct ListObjectsInput {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub versions: bool,
    pub page_token: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListObjectsPage {
    pub prefixes: Vec<String>,
    pub objects: Vec<ObjectMeta>,
    pub next_page_token: Option<String>,
}

/// The storage operations the client is implemented in terms of.
#[async_trait]
pub(crate) trait StorageApi: Send + Sync {
    async fn read_object(&self, input: ReadObjectInput) -> ApiResult<ReadObjectOutput>;

    async fn object_meta(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<i64>,
    ) -> ApiResult<ObjectMeta>;

    async fn write_object(&self, input: WriteObjectInput) -> ApiResult<ObjectMeta>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> ApiResult<ObjectMeta>;

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<i64>,
    ) -> ApiResult<()>;

    async fn list_objects_page(&self, input: ListObjectsInput) -> ApiResult<ListObjectsPage>;

    /// Composes the given source objects, in order, into a single destination object.
    async fn compose_object(
        &self,
        bucket: &str,
        key: &str,
        sources: Vec<String>,
        if_generation_match: Option<i64>,
    ) -> ApiResult<ObjectMeta>;

    async fn bucket_versioning(&self, bucket: &str) -> ApiResult<bool>;

    async fn bucket_locking(&self, bucket: &str) -> ApiResult<bool>;
}

/// The 'StorageApi' implementation backed by the concrete SDK client.
pub(crate) struct SdkApi {
    client: Client,
}

impl SdkApi {
    pub fn new(client: Client) -> Self {
        SdkApi { client }
    }
}

fn to_chrono(datetime: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(datetime.unix_timestamp(), datetime.nanosecond())
}

fn to_meta(object: GcsObject) -> ObjectMeta {
    ObjectMeta {
        key: object.name,
        size: u64::try_from(object.size).ok(),
        etag: Some(object.etag),
        updated: object.updated.and_then(to_chrono),
        generation: object.generation,
        deleted_at: object.time_deleted.and_then(to_chrono),
        retention_expires: object.retention_expiration_time.and_then(to_chrono),
    }
}

#[async_trait]
impl StorageApi for SdkApi {
    async fn read_object(&self, input: ReadObjectInput) -> ApiResult<ReadObjectOutput> {
        let request = GetObjectRequest {
            bucket: input.bucket.clone(),
            object: input.key.clone(),
            generation: input.generation,
            ..Default::default()
        };

        let meta =
            to_meta(self.client.get_object(&request).await.map_err(ApiError::from_gcp)?);

        let range = match &input.range {
            Some(range) => DownloadRange(Some(range.start), range.end),
            None => DownloadRange(None, None),
        };

        let body = self
            .client
            .download_streamed_object(&request, &range)
            .await
            .map_err(ApiError::from_gcp)?
            .map_err(std::io::Error::other)
            .boxed();

        Ok(ReadObjectOutput { body, meta })
    }

    async fn object_meta(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<i64>,
    ) -> ApiResult<ObjectMeta> {
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            generation,
            ..Default::default()
        };

        let object = self.client.get_object(&request).await.map_err(ApiError::from_gcp)?;

        Ok(to_meta(object))
    }

    async fn write_object(&self, input: WriteObjectInput) -> ApiResult<ObjectMeta> {
        let request = UploadObjectRequest {
            bucket: input.bucket.clone(),
            if_generation_match: input.if_generation_match,
            ..Default::default()
        };

        // Uploading the checksum alongside the data has the service reject corrupted uploads
        let metadata = GcsObject {
            name: input.key.clone(),
            md5_hash: Some(STANDARD.encode(md5::compute(&input.body).0)),
            ..Default::default()
        };

        let object = self
            .client
            .upload_object(&request, input.body, &UploadType::Multipart(Box::new(metadata)))
            .await
            .map_err(ApiError::from_gcp)?;

        Ok(to_meta(object))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
    ) -> ApiResult<ObjectMeta> {
        let request = CopyObjectRequest {
            source_bucket: source_bucket.to_string(),
            source_object: source_key.to_string(),
            destination_bucket: bucket.to_string(),
            destination_object: key.to_string(),
            ..Default::default()
        };

        let object = self.client.copy_object(&request).await.map_err(ApiError::from_gcp)?;

        Ok(to_meta(object))
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        generation: Option<i64>,
    ) -> ApiResult<()> {
        let request = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            generation,
            ..Default::default()
        };

        self.client.delete_object(&request).await.map_err(ApiError::from_gcp)
    }

    async fn list_objects_page(&self, input: ListObjectsInput) -> ApiResult<ListObjectsPage> {
        let request = ListObjectsRequest {
            bucket: input.bucket.clone(),
            prefix: Some(input.prefix.clone()),
            delimiter: input.delimiter.clone(),
            versions: Some(input.versions),
            page_token: input.page_token.clone(),
            ..Default::default()
        };

        let resp = self.client.list_objects(&request).await.map_err(ApiError::from_gcp)?;

        Ok(ListObjectsPage {
            prefixes: resp.prefixes.unwrap_or_default(),
            objects: resp.items.unwrap_or_default().into_iter().map(to_meta).collect(),
            next_page_token: resp.next_page_token,
        })
    }

    async fn compose_object(
        &self,
        bucket: &str,
        key: &str,
        sources: Vec<String>,
        if_generation_match: Option<i64>,
    ) -> ApiResult<ObjectMeta> {
        let source_objects = sources
            .into_iter()
            .map(|name| SourceObjects { name, ..Default::default() })
            .collect();

        let request = ComposeObjectRequest {
            bucket: bucket.to_string(),
            destination_object: key.to_string(),
            if_generation_match,
            composing_targets: ComposingTargets {
                source_objects,
                ..Default::default()
            },
            ..Default::default()
        };

        let object = self.client.compose_object(&request).await.map_err(ApiError::from_gcp)?;

        Ok(to_meta(object))
    }

    async fn bucket_versioning(&self, bucket: &str) -> ApiResult<bool> {
        let request = GetBucketRequest { bucket: bucket.to_string(), ..Default::default() };

        let resp = self.client.get_bucket(&request).await.map_err(ApiError::from_gcp)?;

        Ok(resp.versioning.is_some_and(|versioning| versioning.enabled))
    }

    async fn bucket_locking(&self, bucket: &str) -> ApiResult<bool> {
        let request = GetBucketRequest { bucket: bucket.to_string(), ..Default::default() };

        let resp = self.client.get_bucket(&request).await.map_err(ApiError::from_gcp)?;

        Ok(resp.retention_policy.is_some())
    }
}
