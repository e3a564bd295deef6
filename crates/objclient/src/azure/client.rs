//! An 'ObjectClient' implementation for Azure blob storage.
//!
//! Azure uses the container/blob naming convention, however, for consistency this client
//! continues to use the bucket/key names.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use uuid::Uuid;

use crate::azure::api::{
    BlobApi, CommitBlocksInput, GetBlobInput, ListBlobsInput, PutBlobInput, SdkApi,
    StageBlockFromUrlInput, StageBlockInput, SAS_REQUIRES_SHARED_KEY,
};
use crate::client::{
    should_ignore, AbortMultipartUploadOptions, AppendToObjectOptions, BucketStatusOptions,
    CompleteMultipartUploadOptions, CopyObjectOptions, CreateMultipartUploadOptions,
    DeleteDirectoryOptions, DeleteObjectVersionsOptions, DeleteObjectsOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFunc, IterateObjectsOptions, ListPartsOptions,
    ObjectClient, Precondition, PutObjectOptions, SetObjectLockOptions, UploadPartCopyOptions,
    UploadPartOptions, NO_UPLOAD_ID,
};
use crate::error::{Error, Result};
use crate::pool::{num_workers, Pool};
use crate::values::{
    validate_range, BucketLockingStatus, BucketVersioningStatus, LockType, Object, ObjectAttrs,
    Part, Provider,
};

/// The number of blobs deleted per batch by 'delete_directory'; matches the AWS batch size.
const DELETE_BATCH_SIZE: usize = 1000;

/// A client which allows the creation/management of blobs stored in Azure blob storage.
pub struct AzureClient {
    api: Arc<dyn BlobApi>,
}

impl AzureClient {
    /// Creates a new client using the given service client, in general the one produced by
    /// 'create_client'.
    pub fn new(service: azure_storage_blobs::prelude::BlobServiceClient) -> Self {
        AzureClient { api: Arc::new(SdkApi::new(service)) }
    }

    pub(crate) fn with_api(api: Arc<dyn BlobApi>) -> Self {
        AzureClient { api }
    }

    /// Returns a URL the service can read the given blob from when copying server-side. A SAS
    /// URL where the client holds a shared key, falling back to the plain blob URL otherwise;
    /// the SDK only reports the latter case via its error message.
    async fn source_url(&self, bucket: &str, key: &str) -> Result<String> {
        let minted = self.api.sas_url(bucket, key).await;

        match minted {
            Ok(url) => Ok(url),
            Err(err) if err.message.contains(SAS_REQUIRES_SHARED_KEY) => {
                self.api.blob_url(bucket, key).map_err(|err| handle_error(bucket, key, err))
            }
            Err(err) => Err(handle_error(bucket, key, err)),
        }
    }

    /// Deletes the given key/version pairs, parallelized with a bounded worker pool; deleting an
    /// absent blob is not an error.
    async fn delete_versions(
        &self,
        bucket: &str,
        versions: Vec<(String, Option<String>)>,
    ) -> Result<()> {
        let pool = Pool::new(num_workers(versions.len()));

        for (key, version_id) in versions {
            let (api, bucket) = (Arc::clone(&self.api), bucket.to_string());

            let task = async move {
                let result = api.delete_blob(&bucket, &key, version_id.as_deref()).await;

                match result {
                    Ok(()) => Ok(()),
                    Err(err) if is_key_not_found(err.code()) => Ok(()),
                    Err(err) => Err(handle_error(&bucket, &key, err)),
                }
            };

            if pool.queue(task).await.is_err() {
                break;
            }
        }

        pool.stop().await
    }

    async fn list_pages(
        &self,
        input: &IterateObjectsOptions,
        mut func: impl FnMut(ObjectAttrs) -> Result<()>,
    ) -> Result<()> {
        let mut marker = None;

        loop {
            let page = self
                .api
                .list_blobs_page(ListBlobsInput {
                    container: input.bucket.clone(),
                    prefix: input.prefix.clone(),
                    delimiter: input.delimiter.clone(),
                    versions: input.versions,
                    marker,
                })
                .await
                .map_err(|err| handle_error(&input.bucket, "", err))?;

            for prefix in page.prefixes {
                func(ObjectAttrs { key: prefix, ..Default::default() })?;
            }

            for blob in page.blobs {
                func(ObjectAttrs {
                    key: blob.key,
                    size: blob.size,
                    last_modified: blob.last_modified,
                    version_id: blob.version_id,
                    is_current_version: blob.is_current_version,
                    lock_type: lock_type(blob.immutable_until),
                    lock_expiration: blob.immutable_until,
                    ..Default::default()
                })?;
            }

            marker = page.marker;

            if marker.is_none() {
                return Ok(());
            }
        }
    }
}

/// Generates a fresh block id; the service requires them to be base64 encoded and of equal
/// length within a blob.
fn new_block_id() -> String {
    STANDARD.encode(Uuid::new_v4().to_string())
}

fn md5sum(body: &Bytes) -> [u8; 16] {
    md5::compute(body).0
}

/// An immutability policy forbids deletion until it expires, the behaviour of a compliance lock.
fn lock_type(immutable_until: Option<chrono::DateTime<chrono::Utc>>) -> LockType {
    match immutable_until {
        Some(_) => LockType::Compliance,
        None => LockType::Undefined,
    }
}

#[async_trait]
impl ObjectClient for AzureClient {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let resp = self
            .api
            .get_blob(GetBlobInput {
                container: opts.bucket.clone(),
                blob: opts.key.clone(),
                range: opts.byte_range,
                version_id: opts.version_id,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

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
            .get_blob_properties(&opts.bucket, &opts.key, opts.version_id.as_deref())
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(ObjectAttrs {
            key: opts.key,
            size: resp.size,
            last_modified: resp.last_modified,
            etag: resp.etag,
            version_id: resp.version_id,
            is_current_version: true,
            lock_type: lock_type(resp.immutable_until),
            lock_expiration: resp.immutable_until,
            ..Default::default()
        })
    }

    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        // The SDK does not expose immutability policies, locks cannot be applied at write time
        if opts.lock.is_some() {
            return Err(Error::UnsupportedOperation);
        }

        let (if_none_match, if_match) = match &opts.precondition {
            Some(Precondition::OnlyIfAbsent) => (true, None),
            Some(Precondition::IfMatch(etag)) => (false, Some(etag.clone())),
            None => (false, None),
        };

        let size = opts.body.len() as u64;
        let md5 = md5sum(&opts.body);

        self.api
            .put_blob(PutBlobInput {
                container: opts.bucket.clone(),
                blob: opts.key.clone(),
                body: opts.body,
                md5,
                if_none_match,
                if_match,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(ObjectAttrs {
            key: opts.key,
            size: Some(size),
            is_current_version: true,
            ..Default::default()
        })
    }

    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs> {
        let source = self.source_url(&opts.source_bucket, &opts.source_key).await?;

        self.api
            .copy_blob_from_url(&opts.destination_bucket, &opts.destination_key, &source)
            .await
            .map_err(|err| {
                handle_error(&opts.destination_bucket, &opts.destination_key, err)
            })?;

        Ok(ObjectAttrs {
            key: opts.destination_key,
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

        // An absent or empty blob is created, rather than appended to
        let empty = match &attrs {
            Ok(attrs) => attrs.size.unwrap_or_default() == 0,
            Err(err) if err.is_not_found() => true,
            Err(_) => false,
        };

        if empty {
            self.put_object(PutObjectOptions {
                bucket: opts.bucket,
                key: opts.key,
                body: opts.body,
                ..Default::default()
            })
            .await?;

            return Ok(());
        }

        attrs?;

        let existing = self
            .upload_part_copy(UploadPartCopyOptions {
                destination_bucket: opts.bucket.clone(),
                upload_id: NO_UPLOAD_ID.to_string(),
                destination_key: opts.key.clone(),
                source_bucket: opts.bucket.clone(),
                source_key: opts.key.clone(),
                ..Default::default()
            })
            .await?;

        let appended = self
            .upload_part(UploadPartOptions {
                bucket: opts.bucket.clone(),
                upload_id: NO_UPLOAD_ID.to_string(),
                key: opts.key.clone(),
                body: opts.body,
                ..Default::default()
            })
            .await?;

        self.complete_multipart_upload(CompleteMultipartUploadOptions {
            bucket: opts.bucket,
            upload_id: NO_UPLOAD_ID.to_string(),
            key: opts.key,
            parts: vec![existing, appended],
            ..Default::default()
        })
        .await
    }

    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()> {
        let versions = opts.keys.into_iter().map(|key| (key, None)).collect();

        self.delete_versions(&opts.bucket, versions).await
    }

    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()> {
        let versions = opts
            .versions
            .into_iter()
            .map(|version| (version.key, Some(version.version_id)))
            .collect();

        self.delete_versions(&opts.bucket, versions).await
    }

    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()> {
        let mut current: Vec<(String, Option<String>)> = Vec::new();
        let mut noncurrent: Vec<(String, Option<String>)> = Vec::new();

        let list = IterateObjectsOptions {
            bucket: opts.bucket.clone(),
            prefix: opts.prefix.clone(),
            versions: opts.versions,
            ..Default::default()
        };

        let mut batched = Vec::new();

        self.list_pages(&list, |attrs| {
            let now = chrono::Utc::now();

            if crate::client::under_retention(&attrs, now) {
                return Err(Error::RetentionNotExpired {
                    bucket: opts.bucket.clone(),
                    key: attrs.key,
                });
            }

            // The current version must be soft-deleted before its history can be purged
            if attrs.is_current_version {
                current.push((attrs.key.clone(), None));
            }

            if opts.versions {
                noncurrent.push((attrs.key, attrs.version_id));
            }

            if current.len() >= DELETE_BATCH_SIZE || noncurrent.len() >= DELETE_BATCH_SIZE {
                batched.push((std::mem::take(&mut current), std::mem::take(&mut noncurrent)));
            }

            Ok(())
        })
        .await?;

        batched.push((current, noncurrent));

        for (current, noncurrent) in batched {
            for batch in [current, noncurrent] {
                if batch.is_empty() {
                    continue;
                }

                self.delete_versions(&opts.bucket, batch).await?;
            }
        }

        Ok(())
    }

    async fn iterate_objects(
        &self,
        opts: IterateObjectsOptions,
        func: IterateFunc<'_>,
    ) -> Result<()> {
        if !opts.include.is_empty() && !opts.exclude.is_empty() {
            return Err(Error::IncludeAndExclude);
        }

        self.list_pages(&opts, |attrs| {
            if should_ignore(&attrs.key, &opts.include, &opts.exclude) {
                return Ok(());
            }

            // A callback error stops iteration and propagates unwrapped
            func(attrs).map_err(Error::Callback)
        })
        .await
    }

    async fn create_multipart_upload(&self, _opts: CreateMultipartUploadOptions) -> Result<String> {
        // Blocks are staged directly against the destination blob, there is no upload to create
        Ok(NO_UPLOAD_ID.to_string())
    }

    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>> {
        if opts.upload_id != NO_UPLOAD_ID {
            return Err(Error::ExpectedNoUploadId);
        }

        let blocks = self
            .api
            .uncommitted_blocks(&opts.bucket, &opts.key)
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        let parts =
            blocks.into_iter().map(|(id, size)| Part { id, size, ..Default::default() }).collect();

        Ok(parts)
    }

    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part> {
        if opts.upload_id != NO_UPLOAD_ID {
            return Err(Error::ExpectedNoUploadId);
        }

        let block_id = new_block_id();
        let size = opts.body.len() as u64;
        let md5 = md5sum(&opts.body);

        self.api
            .stage_block(StageBlockInput {
                container: opts.bucket.clone(),
                blob: opts.key.clone(),
                block_id: block_id.clone(),
                body: opts.body,
                md5,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(Part { id: block_id, number: opts.number, size })
    }

    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part> {
        if opts.upload_id != NO_UPLOAD_ID {
            return Err(Error::ExpectedNoUploadId);
        }

        validate_range(opts.byte_range.as_ref(), false)?;

        let source = self.source_url(&opts.source_bucket, &opts.source_key).await?;

        let block_id = new_block_id();

        self.api
            .stage_block_from_url(StageBlockFromUrlInput {
                container: opts.destination_bucket.clone(),
                blob: opts.destination_key.clone(),
                block_id: block_id.clone(),
                source_url: source,
                range: opts.byte_range,
            })
            .await
            .map_err(|err| {
                handle_error(&opts.destination_bucket, &opts.destination_key, err)
            })?;

        let size = opts.byte_range.and_then(|range| range.len()).unwrap_or_default();

        Ok(Part { id: block_id, number: opts.number, size })
    }

    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()> {
        if opts.upload_id != NO_UPLOAD_ID {
            return Err(Error::ExpectedNoUploadId);
        }

        // The SDK does not expose immutability policies, locks cannot be applied at write time
        if opts.lock.is_some() {
            return Err(Error::UnsupportedOperation);
        }

        let if_none_match = matches!(opts.precondition, Some(Precondition::OnlyIfAbsent));

        self.api
            .commit_block_list(CommitBlocksInput {
                container: opts.bucket.clone(),
                blob: opts.key.clone(),
                block_ids: opts.parts.into_iter().map(|part| part.id).collect(),
                if_none_match,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))
    }

    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()> {
        if opts.upload_id != NO_UPLOAD_ID {
            return Err(Error::ExpectedNoUploadId);
        }

        // Staged blocks cannot be removed, the service garbage collects them after a week

        Ok(())
    }

    async fn get_bucket_versioning_status(
        &self,
        _opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus> {
        // Blob versioning status lives on the storage account, not the container, and the
        // service client has no access to account management APIs
        Err(Error::UnsupportedOperation)
    }

    async fn get_bucket_locking_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus> {
        let enabled = self
            .api
            .container_locking(&opts.bucket)
            .await
            .map_err(|err| handle_error(&opts.bucket, "", err))?;

        Ok(BucketLockingStatus { enabled })
    }

    async fn set_object_lock(&self, _opts: SetObjectLockOptions) -> Result<()> {
        // The SDK does not expose immutability policies
        Err(Error::UnsupportedOperation)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts a blob storage error into a user friendly error where possible.
fn handle_error(bucket: &str, key: &str, err: crate::api::ApiError) -> Error {
    if err.unreachable {
        return Error::EndpointUnreachable;
    }

    match err.code() {
        Some("AuthenticationFailed") => Error::Unauthenticated,
        Some("AuthorizationFailure") => Error::Unauthorized,
        Some("BlobNotFound") => Error::not_found("blob", key),
        Some("ContainerNotFound") => Error::not_found("container", bucket),
        Some("ConditionNotMet") | Some("BlobAlreadyExists") => {
            Error::PreconditionFailed { key: key.to_string() }
        }
        Some("BlobArchived") => Error::ArchiveStorage { key: key.to_string() },
        _ => Error::Provider { provider: Provider::Azure, source: Box::new(err) },
    }
}

/// Returns whether the given error code means the blob being operated on did not exist.
fn is_key_not_found(code: Option<&str>) -> bool {
    code == Some("BlobNotFound")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures::StreamExt;
    use parking_lot::Mutex;

    use super::*;
    use crate::api::{ApiError, ApiResult};
    use crate::azure::api::{BlobPropertiesOutput, GetBlobOutput, ListBlobsPage, ListedBlob};
    use crate::values::read_body;

    #[derive(Default)]
    struct FakeBlobStore {
        blobs: Mutex<HashMap<String, Bytes>>,
        immutability: Mutex<HashMap<String, chrono::DateTime<chrono::Utc>>>,
        staged: Mutex<Vec<(String, Bytes)>>,
        copied_urls: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        sas_supported: bool,
    }

    impl FakeBlobStore {
        fn with_sas() -> Self {
            FakeBlobStore { sas_supported: true, ..Default::default() }
        }

        fn with_blob(self, key: &str, body: Bytes) -> Self {
            self.blobs.lock().insert(key.to_string(), body);
            self
        }

        fn with_immutability(self, key: &str, until: chrono::DateTime<chrono::Utc>) -> Self {
            self.immutability.lock().insert(key.to_string(), until);
            self
        }

        fn staged_body(&self, block_id: &str) -> Option<Bytes> {
            self.staged
                .lock()
                .iter()
                .find(|(id, _)| id == block_id)
                .map(|(_, body)| body.clone())
        }
    }

    #[async_trait]
    impl BlobApi for FakeBlobStore {
        async fn get_blob(&self, input: GetBlobInput) -> ApiResult<GetBlobOutput> {
            let body = self
                .blobs
                .lock()
                .get(&input.blob)
                .cloned()
                .ok_or_else(|| ApiError::new(Some("BlobNotFound"), "blob not found"))?;

            Ok(GetBlobOutput {
                size: Some(body.len() as u64),
                last_modified: None,
                etag: Some("etag".to_string()),
                version_id: None,
                body: futures::stream::iter([Ok(body)]).boxed(),
            })
        }

        async fn get_blob_properties(
            &self,
            _container: &str,
            blob: &str,
            _version_id: Option<&str>,
        ) -> ApiResult<BlobPropertiesOutput> {
            let body = self
                .blobs
                .lock()
                .get(blob)
                .cloned()
                .ok_or_else(|| ApiError::new(Some("BlobNotFound"), "blob not found"))?;

            Ok(BlobPropertiesOutput { size: Some(body.len() as u64), ..Default::default() })
        }

        async fn put_blob(&self, input: PutBlobInput) -> ApiResult<()> {
            assert_eq!(input.md5, md5::compute(&input.body).0);

            if input.if_none_match && self.blobs.lock().contains_key(&input.blob) {
                return Err(ApiError::new(Some("BlobAlreadyExists"), "blob already exists"));
            }

            self.blobs.lock().insert(input.blob, input.body);

            Ok(())
        }

        async fn copy_blob_from_url(
            &self,
            _container: &str,
            blob: &str,
            source_url: &str,
        ) -> ApiResult<()> {
            self.copied_urls.lock().push(source_url.to_string());

            let source = source_url.rsplit_once('/').map(|(_, key)| key).unwrap_or_default();
            let body = self.blobs.lock().get(source).cloned().unwrap_or_default();

            self.blobs.lock().insert(blob.to_string(), body);

            Ok(())
        }

        async fn delete_blob(
            &self,
            _container: &str,
            blob: &str,
            _version_id: Option<&str>,
        ) -> ApiResult<()> {
            self.deleted.lock().push(blob.to_string());

            self.blobs
                .lock()
                .remove(blob)
                .map(|_| ())
                .ok_or_else(|| ApiError::new(Some("BlobNotFound"), "blob not found"))
        }

        async fn list_blobs_page(&self, input: ListBlobsInput) -> ApiResult<ListBlobsPage> {
            let blobs = self
                .blobs
                .lock()
                .iter()
                .filter(|(key, _)| key.starts_with(&input.prefix))
                .map(|(key, body)| ListedBlob {
                    key: key.clone(),
                    size: Some(body.len() as u64),
                    is_current_version: true,
                    immutable_until: self.immutability.lock().get(key).copied(),
                    ..Default::default()
                })
                .collect();

            Ok(ListBlobsPage { blobs, ..Default::default() })
        }

        async fn uncommitted_blocks(
            &self,
            _container: &str,
            _blob: &str,
        ) -> ApiResult<Vec<(String, u64)>> {
            let blocks = self
                .staged
                .lock()
                .iter()
                .map(|(id, body)| (id.clone(), body.len() as u64))
                .collect();

            Ok(blocks)
        }

        async fn stage_block(&self, input: StageBlockInput) -> ApiResult<()> {
            assert_eq!(input.md5, md5::compute(&input.body).0);

            self.staged.lock().push((input.block_id, input.body));

            Ok(())
        }

        async fn stage_block_from_url(&self, input: StageBlockFromUrlInput) -> ApiResult<()> {
            let source = input.source_url.rsplit_once('/').map(|(_, key)| key).unwrap_or_default();
            let source = source.split('?').next().unwrap_or_default();

            let body = self
                .blobs
                .lock()
                .get(source)
                .cloned()
                .ok_or_else(|| ApiError::new(Some("BlobNotFound"), "blob not found"))?;

            let body = match &input.range {
                Some(range) => {
                    let (start, end) = (range.start as usize, range.end.map(|end| end as usize));
                    body.slice(start..end.map(|end| end + 1).unwrap_or(body.len()))
                }
                None => body,
            };

            self.staged.lock().push((input.block_id, body));

            Ok(())
        }

        async fn commit_block_list(&self, input: CommitBlocksInput) -> ApiResult<()> {
            if input.if_none_match && self.blobs.lock().contains_key(&input.blob) {
                return Err(ApiError::new(Some("BlobAlreadyExists"), "blob already exists"));
            }

            let mut combined = bytes::BytesMut::new();

            for id in &input.block_ids {
                let body = self
                    .staged_body(id)
                    .ok_or_else(|| ApiError::new(Some("InvalidBlockId"), "invalid block id"))?;

                combined.extend_from_slice(&body);
            }

            self.blobs.lock().insert(input.blob, combined.freeze());
            self.staged.lock().clear();

            Ok(())
        }

        async fn container_locking(&self, _container: &str) -> ApiResult<bool> {
            Ok(false)
        }

        async fn sas_url(&self, _container: &str, blob: &str) -> ApiResult<String> {
            if !self.sas_supported {
                return Err(ApiError::new(None, SAS_REQUIRES_SHARED_KEY));
            }

            Ok(format!("https://account.blob.example.com/container/{blob}?sig=signed"))
        }

        fn blob_url(&self, _container: &str, blob: &str) -> ApiResult<String> {
            Ok(format!("https://account.blob.example.com/container/{blob}"))
        }
    }

    fn client(fake: FakeBlobStore) -> (AzureClient, Arc<FakeBlobStore>) {
        let api = Arc::new(fake);
        (AzureClient::with_api(Arc::clone(&api) as Arc<dyn BlobApi>), api)
    }

    async fn get_body(client: &AzureClient, key: &str) -> Bytes {
        let object = client
            .get_object(GetObjectOptions {
                bucket: "container".to_string(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        read_body(object.body).await.unwrap()
    }

    #[tokio::test]
    async fn append_to_missing_blob_is_a_put() {
        let (client, api) = client(FakeBlobStore::with_sas());

        client
            .append_to_object(AppendToObjectOptions {
                bucket: "container".to_string(),
                key: "key".to_string(),
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap();

        assert_eq!(get_body(&client, "key").await, Bytes::from_static(b"value"));
        assert!(api.staged.lock().is_empty());
    }

    #[tokio::test]
    async fn append_stages_existing_blob_then_new_data() {
        let (client, _) =
            client(FakeBlobStore::with_sas().with_blob("key", Bytes::from_static(b"start")));

        client
            .append_to_object(AppendToObjectOptions {
                bucket: "container".to_string(),
                key: "key".to_string(),
                body: Bytes::from_static(b"-end"),
            })
            .await
            .unwrap();

        assert_eq!(get_body(&client, "key").await, Bytes::from_static(b"start-end"));
    }

    #[tokio::test]
    async fn upload_part_rejects_an_upload_id() {
        let (client, _) = client(FakeBlobStore::default());

        let err = client
            .upload_part(UploadPartOptions {
                bucket: "container".to_string(),
                upload_id: "id".to_string(),
                key: "key".to_string(),
                number: 1,
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ExpectedNoUploadId));
    }

    #[tokio::test]
    async fn block_ids_are_base64_encoded() {
        let (client, _) = client(FakeBlobStore::default());

        let part = client
            .upload_part(UploadPartOptions {
                bucket: "container".to_string(),
                upload_id: NO_UPLOAD_ID.to_string(),
                key: "key".to_string(),
                number: 1,
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap();

        let decoded = STANDARD.decode(&part.id).unwrap();

        // Decodes to a textual UUID
        assert!(Uuid::parse_str(std::str::from_utf8(&decoded).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn commit_preserves_part_order() {
        let (client, _) = client(FakeBlobStore::default());

        let mut parts = Vec::new();

        for body in [&b"first-"[..], &b"second"[..]] {
            let part = client
                .upload_part(UploadPartOptions {
                    bucket: "container".to_string(),
                    upload_id: NO_UPLOAD_ID.to_string(),
                    key: "key".to_string(),
                    number: 0,
                    body: Bytes::from_static(body),
                })
                .await
                .unwrap();

            parts.push(part);
        }

        client
            .complete_multipart_upload(CompleteMultipartUploadOptions {
                bucket: "container".to_string(),
                upload_id: NO_UPLOAD_ID.to_string(),
                key: "key".to_string(),
                parts,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(get_body(&client, "key").await, Bytes::from_static(b"first-second"));
    }

    #[tokio::test]
    async fn list_parts_returns_uncommitted_blocks() {
        let (client, _) = client(FakeBlobStore::default());

        client
            .upload_part(UploadPartOptions {
                bucket: "container".to_string(),
                upload_id: NO_UPLOAD_ID.to_string(),
                key: "key".to_string(),
                number: 0,
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap();

        let parts = client
            .list_parts(ListPartsOptions {
                bucket: "container".to_string(),
                upload_id: NO_UPLOAD_ID.to_string(),
                key: "key".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size, 5);
    }

    #[tokio::test]
    async fn copy_falls_back_to_plain_url_without_a_shared_key() {
        let (client, api) =
            client(FakeBlobStore::default().with_blob("src", Bytes::from_static(b"value")));

        client
            .copy_object(CopyObjectOptions {
                destination_bucket: "container".to_string(),
                destination_key: "dst".to_string(),
                source_bucket: "container".to_string(),
                source_key: "src".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            *api.copied_urls.lock(),
            vec!["https://account.blob.example.com/container/src".to_string()]
        );
    }

    #[tokio::test]
    async fn copy_uses_a_sas_url_with_a_shared_key() {
        let (client, api) =
            client(FakeBlobStore::with_sas().with_blob("src", Bytes::from_static(b"value")));

        client
            .copy_object(CopyObjectOptions {
                destination_bucket: "container".to_string(),
                destination_key: "dst".to_string(),
                source_bucket: "container".to_string(),
                source_key: "src".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            *api.copied_urls.lock(),
            vec!["https://account.blob.example.com/container/src?sig=signed".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_directory_refuses_blobs_under_an_immutability_policy() {
        let until = chrono::Utc::now() + chrono::Duration::hours(1);

        let (client, api) = client(
            FakeBlobStore::default()
                .with_blob("dir/locked", Bytes::from_static(b"value"))
                .with_immutability("dir/locked", until),
        );

        let err = client
            .delete_directory(DeleteDirectoryOptions {
                bucket: "container".to_string(),
                prefix: "dir/".to_string(),
                versions: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetentionNotExpired { .. }), "{err}");
        assert!(api.deleted.lock().is_empty());
        assert!(api.blobs.lock().contains_key("dir/locked"));
    }

    #[tokio::test]
    async fn delete_directory_removes_blobs_with_expired_immutability() {
        let until = chrono::Utc::now() - chrono::Duration::hours(1);

        let (client, api) = client(
            FakeBlobStore::default()
                .with_blob("dir/unlocked", Bytes::from_static(b"value"))
                .with_immutability("dir/unlocked", until),
        );

        client
            .delete_directory(DeleteDirectoryOptions {
                bucket: "container".to_string(),
                prefix: "dir/".to_string(),
                versions: false,
            })
            .await
            .unwrap();

        assert!(api.blobs.lock().is_empty());
    }

    #[tokio::test]
    async fn delete_ignores_missing_blobs() {
        let (client, api) = client(FakeBlobStore::default());

        client
            .delete_objects(DeleteObjectsOptions {
                bucket: "container".to_string(),
                keys: vec!["missing".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(*api.deleted.lock(), vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn versioning_status_is_unsupported() {
        let (client, _) = client(FakeBlobStore::default());

        let err = client
            .get_bucket_versioning_status(BucketStatusOptions { bucket: "container".to_string() })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedOperation));
    }

    #[test]
    fn handle_error_maps_provider_codes() {
        let cases = [
            ("AuthenticationFailed", "failed to authenticate, check that valid credentials have been provided"),
            ("AuthorizationFailure", "authenticated user does not have permission to access this resource"),
            ("BlobNotFound", "blob 'key' not found"),
            ("ContainerNotFound", "container 'container' not found"),
            ("BlobAlreadyExists", "precondition failed for object 'key'"),
        ];

        for (code, message) in cases {
            let err = handle_error("container", "key", ApiError::new(Some(code), "raw"));
            assert_eq!(err.to_string(), message, "code {code}");
        }
    }
}
