//! The minimal subset of the Azure blob storage SDK surface used by the client.

use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::prelude::*;
use azure_core::request_options::IfMatchCondition;
use azure_storage::prelude::*;
use azure_storage_blobs::blob::{BlobBlockType, BlockList};
use azure_storage_blobs::container::operations::BlobItem;
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use time::OffsetDateTime;

pub(crate) use crate::api::{ApiError, ApiResult};
use crate::values::{ByteRange, ObjectBody};

/// The error message 'shared_access_signature' produces when the service client was not built
/// from an account key; the SDK does not export this failure as a distinct kind, so it can only
/// be recognised by its message.
pub(crate) const SAS_REQUIRES_SHARED_KEY: &str =
    "Shared access signature generation - SAS can be generated only from key and account clients";

impl ApiError {
    fn from_azure(err: azure_core::error::Error) -> Self {
        let code = match err.kind() {
            ErrorKind::HttpResponse { error_code: Some(code), .. } => Some(code.clone()),
            _ => None,
        };

        let unreachable = matches!(err.kind(), ErrorKind::Io);

        ApiError { code, message: err.to_string(), unreachable, source: Some(Box::new(err)) }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GetBlobInput {
    pub container: String,
    pub blob: String,
    pub range: Option<ByteRange>,
    pub version_id: Option<String>,
}

pub(crate) struct GetBlobOutput {
    pub body: ObjectBody,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct BlobPropertiesOutput {
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    /// When the blob's immutability policy expires; absent when the blob carries none.
    pub immutable_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct PutBlobInput {
    pub container: String,
    pub blob: String,
    pub body: Bytes,
    /// The MD5 of 'body', validated by the service on receipt.
    pub md5: [u8; 16],
    pub if_none_match: bool,
    pub if_match: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListBlobsInput {
    pub container: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub versions: bool,
    pub marker: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ListedBlob {
    pub key: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
    pub is_current_version: bool,
    /// When the blob's immutability policy expires; absent when the blob carries none.
    pub immutable_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct ListBlobsPage {
    pub prefixes: Vec<String>,
    pub blobs: Vec<ListedBlob>,
    pub marker: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct StageBlockInput {
    pub container: String,
    pub blob: String,
    pub block_id: String,
    pub body: Bytes,
    /// The MD5 of 'body', validated by the service on receipt.
    pub md5: [u8; 16],
}

#[derive(Debug, Default)]
pub(crate) struct StageBlockFromUrlInput {
    pub container: String,
    pub blob: String,
    pub block_id: String,
    pub source_url: String,
    pub range: Option<ByteRange>,
}

#[derive(Debug, Default)]
pub(crate) struct CommitBlocksInput {
    pub container: String,
    pub blob: String,
    /// Block ids in the order the committed blob should be constructed from.
    pub block_ids: Vec<String>,
    pub if_none_match: bool,
}

/// The blob storage operations the client is implemented in terms of.
#[async_trait]
pub(crate) trait BlobApi: Send + Sync {
    async fn get_blob(&self, input: GetBlobInput) -> ApiResult<GetBlobOutput>;

    async fn get_blob_properties(
        &self,
        container: &str,
        blob: &str,
        version_id: Option<&str>,
    ) -> ApiResult<BlobPropertiesOutput>;

    async fn put_blob(&self, input: PutBlobInput) -> ApiResult<()>;

    async fn copy_blob_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> ApiResult<()>;

    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        version_id: Option<&str>,
    ) -> ApiResult<()>;

    async fn list_blobs_page(&self, input: ListBlobsInput) -> ApiResult<ListBlobsPage>;

    /// Returns the (id, size) of each uncommitted block staged against the given blob.
    async fn uncommitted_blocks(&self, container: &str, blob: &str)
        -> ApiResult<Vec<(String, u64)>>;

    async fn stage_block(&self, input: StageBlockInput) -> ApiResult<()>;

    async fn stage_block_from_url(&self, input: StageBlockFromUrlInput) -> ApiResult<()>;

    async fn commit_block_list(&self, input: CommitBlocksInput) -> ApiResult<()>;

    /// Returns whether the container has an immutability policy.
    async fn container_locking(&self, container: &str) -> ApiResult<bool>;

    /// Mints a short-lived read-only SAS URL for the given blob.
    async fn sas_url(&self, container: &str, blob: &str) -> ApiResult<String>;

    /// Returns the plain (unsigned) URL of the given blob.
    fn blob_url(&self, container: &str, blob: &str) -> ApiResult<String>;
}

/// The 'BlobApi' implementation backed by the concrete SDK service client.
pub(crate) struct SdkApi {
    service: BlobServiceClient,
}

impl SdkApi {
    pub fn new(service: BlobServiceClient) -> Self {
        SdkApi { service }
    }

    fn blob_client(&self, container: &str, blob: &str) -> BlobClient {
        self.service.container_client(container).blob_client(blob)
    }
}

fn to_chrono(datetime: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(datetime.unix_timestamp(), datetime.nanosecond())
}

/// Converts a start/end byte range into the SDK's half-open range; an open-ended range runs to
/// the maximum offset, which the service clamps to the blob length.
fn to_sdk_range(range: &ByteRange) -> Range {
    match range.end {
        Some(end) => Range::new(range.start, end + 1),
        None => Range::new(range.start, u64::MAX),
    }
}

fn io_error(err: azure_core::error::Error) -> std::io::Error {
    std::io::Error::other(err)
}

#[async_trait]
impl BlobApi for SdkApi {
    async fn get_blob(&self, input: GetBlobInput) -> ApiResult<GetBlobOutput> {
        let properties = self
            .get_blob_properties(&input.container, &input.blob, input.version_id.as_deref())
            .await?;

        let mut builder = self.blob_client(&input.container, &input.blob).get();

        if let Some(version) = &input.version_id {
            builder = builder.blob_versioning(BlobVersioning::VersionId(version.clone().into()));
        }

        // When a range was requested the reported size is the range's, not the whole blob's
        let size = match &input.range {
            Some(range) => range.len().or_else(|| {
                properties.size.map(|size| size.saturating_sub(range.start))
            }),
            None => properties.size,
        };

        if let Some(range) = &input.range {
            builder = builder.range(to_sdk_range(range));
        }

        let body = builder
            .into_stream()
            .map(|result| result.map_err(io_error))
            .map_ok(|resp| resp.data.map(|chunk| chunk.map_err(io_error)))
            .try_flatten()
            .boxed();

        Ok(GetBlobOutput {
            body,
            size,
            last_modified: properties.last_modified,
            etag: properties.etag,
            version_id: properties.version_id,
        })
    }

    async fn get_blob_properties(
        &self,
        container: &str,
        blob: &str,
        version_id: Option<&str>,
    ) -> ApiResult<BlobPropertiesOutput> {
        let mut builder = self.blob_client(container, blob).get_properties();

        if let Some(version) = version_id {
            builder =
                builder.blob_versioning(BlobVersioning::VersionId(version.to_string().into()));
        }

        let resp = builder.await.map_err(ApiError::from_azure)?;

        Ok(BlobPropertiesOutput {
            size: Some(resp.blob.properties.content_length),
            last_modified: to_chrono(resp.blob.properties.last_modified),
            etag: Some(resp.blob.properties.etag.to_string()),
            version_id: resp.blob.version_id,
            // The SDK drops the x-ms-immutability-policy-* response headers and its blob
            // properties carry no immutability fields, so the policy cannot be read here
            immutable_until: None,
        })
    }

    async fn put_blob(&self, input: PutBlobInput) -> ApiResult<()> {
        let mut builder = self
            .blob_client(&input.container, &input.blob)
            .put_block_blob(input.body)
            .hash(input.md5);

        if input.if_none_match {
            builder = builder.if_match(IfMatchCondition::NotMatch("*".to_string()));
        }

        if let Some(etag) = input.if_match {
            builder = builder.if_match(IfMatchCondition::Match(etag));
        }

        builder.await.map_err(ApiError::from_azure)?;

        Ok(())
    }

    async fn copy_blob_from_url(
        &self,
        container: &str,
        blob: &str,
        source_url: &str,
    ) -> ApiResult<()> {
        let url = url::Url::parse(source_url)
            .map_err(|err| ApiError::new(None, &format!("invalid source url: {err}")))?;

        self.blob_client(container, blob)
            .copy_from_url(url)
            .await
            .map_err(ApiError::from_azure)?;

        Ok(())
    }

    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        version_id: Option<&str>,
    ) -> ApiResult<()> {
        let client = self.blob_client(container, blob);

        // Targeting a version goes through a dedicated builder; 'delete' itself cannot be
        // scoped to one.
        match version_id {
            Some(version) => {
                client
                    .delete_version_id(VersionId::new(version.to_string()))
                    .await
                    .map_err(ApiError::from_azure)?;
            }
            None => {
                client.delete().await.map_err(ApiError::from_azure)?;
            }
        }

        Ok(())
    }

    async fn list_blobs_page(&self, input: ListBlobsInput) -> ApiResult<ListBlobsPage> {
        let mut builder = self
            .service
            .container_client(&input.container)
            .list_blobs()
            .prefix(input.prefix.clone());

        if let Some(delimiter) = &input.delimiter {
            builder = builder.delimiter(delimiter.clone());
        }

        if input.versions {
            builder = builder.include_versions(true);
        }

        if let Some(marker) = &input.marker {
            builder = builder.marker(marker.clone());
        }

        let mut stream = builder.into_stream();

        let Some(resp) = stream.next().await else {
            return Ok(ListBlobsPage::default());
        };

        let resp = resp.map_err(ApiError::from_azure)?;

        let mut page = ListBlobsPage {
            marker: resp.next_marker.map(|marker| marker.as_str().to_string()),
            ..Default::default()
        };

        for item in resp.blobs.items {
            match item {
                BlobItem::BlobPrefix(prefix) => page.prefixes.push(prefix.name),
                BlobItem::Blob(blob) => page.blobs.push(ListedBlob {
                    key: blob.name,
                    size: Some(blob.properties.content_length),
                    last_modified: to_chrono(blob.properties.last_modified),
                    version_id: blob.version_id,
                    is_current_version: blob.is_current_version.unwrap_or(!input.versions),
                    // Listing cannot include immutability policies with the current SDK
                    immutable_until: None,
                }),
            }
        }

        Ok(page)
    }

    async fn uncommitted_blocks(
        &self,
        container: &str,
        blob: &str,
    ) -> ApiResult<Vec<(String, u64)>> {
        let resp = self
            .blob_client(container, blob)
            .get_block_list()
            .block_list_type(BlockListType::Uncommitted)
            .await
            .map_err(ApiError::from_azure)?;

        let blocks = resp
            .block_with_size_list
            .blocks
            .into_iter()
            .map(|block| {
                let id = match &block.block_list_type {
                    BlobBlockType::Committed(id)
                    | BlobBlockType::Uncommitted(id)
                    | BlobBlockType::Latest(id) => String::from_utf8_lossy(id.as_ref()).to_string(),
                };

                (id, block.size_in_bytes)
            })
            .collect();

        Ok(blocks)
    }

    async fn stage_block(&self, input: StageBlockInput) -> ApiResult<()> {
        self.blob_client(&input.container, &input.blob)
            .put_block(input.block_id, input.body)
            .hash(input.md5)
            .await
            .map_err(ApiError::from_azure)?;

        Ok(())
    }

    async fn stage_block_from_url(&self, input: StageBlockFromUrlInput) -> ApiResult<()> {
        let url = url::Url::parse(&input.source_url)
            .map_err(|err| ApiError::new(None, &format!("invalid source url: {err}")))?;

        let mut builder = self
            .blob_client(&input.container, &input.blob)
            .put_block_url(input.block_id, url);

        if let Some(range) = &input.range {
            builder = builder.range(to_sdk_range(range));
        }

        builder.await.map_err(ApiError::from_azure)?;

        Ok(())
    }

    async fn commit_block_list(&self, input: CommitBlocksInput) -> ApiResult<()> {
        let blocks = input
            .block_ids
            .into_iter()
            .map(|id| BlobBlockType::Uncommitted(BlockId::new(id)))
            .collect();

        let mut builder = self
            .blob_client(&input.container, &input.blob)
            .put_block_list(BlockList { blocks });

        if input.if_none_match {
            builder = builder.if_match(IfMatchCondition::NotMatch("*".to_string()));
        }

        builder.await.map_err(ApiError::from_azure)?;

        Ok(())
    }

    async fn container_locking(&self, container: &str) -> ApiResult<bool> {
        let resp = self
            .service
            .container_client(container)
            .get_properties()
            .await
            .map_err(ApiError::from_azure)?;

        Ok(resp.container.has_immutability_policy)
    }

    async fn sas_url(&self, container: &str, blob: &str) -> ApiResult<String> {
        let client = self.blob_client(container, blob);

        let permissions = BlobSasPermissions { read: true, ..Default::default() };
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(48);

        let sas = client
            .shared_access_signature(permissions, expiry)
            .await
            .map_err(ApiError::from_azure)?;

        let url = client.generate_signed_blob_url(&sas).map_err(ApiError::from_azure)?;

        Ok(url.to_string())
    }

    fn blob_url(&self, container: &str, blob: &str) -> ApiResult<String> {
        let url = self.blob_client(container, blob).url().map_err(ApiError::from_azure)?;

        Ok(url.to_string())
    }
}
