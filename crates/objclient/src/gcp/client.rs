//! An 'ObjectClient' implementation for Google Cloud Storage.
//!
//! The service has no native multipart uploads; parts are uploaded as intermediate objects
//! under a well-known prefix and composed into the destination object upon completion.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;
use uuid::Uuid;

use crate::client::{
    basename, dirname, should_ignore, AbortMultipartUploadOptions, AppendToObjectOptions,
    BucketStatusOptions, CompleteMultipartUploadOptions, CopyObjectOptions,
    CreateMultipartUploadOptions, DeleteDirectoryOptions, DeleteObjectVersionsOptions,
    DeleteObjectsOptions, GetObjectAttrsOptions, GetObjectOptions, IterateFunc,
    IterateObjectsOptions, ListPartsOptions, ObjectClient, Precondition, PutObjectOptions,
    SetObjectLockOptions, UploadPartCopyOptions, UploadPartOptions,
};
use crate::error::{Error, Result};
use crate::gcp::api::{
    ApiError, ListObjectsInput, ObjectMeta, ReadObjectInput, SdkApi, StorageApi, WriteObjectInput,
};
use crate::pool::{num_workers, Pool};
use crate::values::{
    validate_range, BucketLockingStatus, BucketVersioningStatus, LockType, Object, ObjectAttrs,
    Part, Provider,
};

/// The maximum number of source objects a single compose call may reference.
pub const MAX_COMPOSABLE: usize = 32;

/// The number of objects deleted per batch by 'delete_directory'; matches the AWS batch size.
const DELETE_BATCH_SIZE: usize = 1000;

/// A client which allows the creation/management of objects stored in Google Cloud Storage.
pub struct GcpClient {
    api: Arc<dyn StorageApi>,
}

impl GcpClient {
    /// Creates a new client using the given SDK client, in general the one produced by
    /// 'create_client'.
    pub fn new(client: google_cloud_storage::client::Client) -> Self {
        GcpClient { api: Arc::new(SdkApi::new(client)) }
    }

    pub(crate) fn with_api(api: Arc<dyn StorageApi>) -> Self {
        GcpClient { api }
    }

    /// Deletes the given key/generation pairs, parallelized with a bounded worker pool; deleting
    /// an absent object is not an error.
    async fn delete_generations(
        &self,
        bucket: &str,
        objects: Vec<(String, Option<String>)>,
    ) -> Result<()> {
        let pool = Pool::new(num_workers(objects.len()));

        for (key, version_id) in objects {
            let (api, bucket) = (Arc::clone(&self.api), bucket.to_string());

            let task = async move {
                let generation = match &version_id {
                    Some(version) => Some(parse_generation(&bucket, &key, version)?),
                    None => None,
                };

                let result = api.delete_object(&bucket, &key, generation).await;

                match result {
                    Ok(()) => Ok(()),
                    Err(err) if is_key_not_found(&err) => Ok(()),
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
        opts: &IterateObjectsOptions,
        mut func: impl FnMut(ObjectAttrs) -> Result<()>,
    ) -> Result<()> {
        let mut token = None;

        loop {
            let page = self
                .api
                .list_objects_page(ListObjectsInput {
                    bucket: opts.bucket.clone(),
                    prefix: opts.prefix.clone(),
                    delimiter: opts.delimiter.clone(),
                    versions: opts.versions,
                    page_token: token,
                })
                .await
                .map_err(|err| handle_error(&opts.bucket, "", err))?;

            for prefix in page.prefixes {
                func(ObjectAttrs { key: prefix, ..Default::default() })?;
            }

            for meta in page.objects {
                let deleted_at = meta.deleted_at;

                let attrs = ObjectAttrs {
                    key: meta.key.clone(),
                    size: meta.size,
                    last_modified: meta.updated,
                    version_id: version_id(opts.versions, &meta),
                    is_current_version: deleted_at.is_none(),
                    lock_type: lock_type(&meta),
                    lock_expiration: meta.retention_expires,
                    ..Default::default()
                };

                func(attrs)?;

                // A soft-deleted generation implies the object was overwritten or deleted,
                // surfaced the way providers with explicit delete markers report it
                if opts.versions && deleted_at.is_some() {
                    func(ObjectAttrs {
                        key: meta.key,
                        last_modified: deleted_at,
                        is_delete_marker: true,
                        ..Default::default()
                    })?;
                }
            }

            token = page.next_page_token;

            if token.is_none() {
                return Ok(());
            }
        }
    }

    /// Composes the given parts into the destination object, recursively reducing them in
    /// chunks of 'MAX_COMPOSABLE' where necessary. Intermediate objects are cleaned up on the
    /// way out, whether composition succeeded or not.
    async fn compose_all(
        &self,
        bucket: &str,
        key: &str,
        mut parts: Vec<String>,
        if_generation_match: Option<i64>,
    ) -> Result<()> {
        let mut intermediates = Vec::new();

        let result = loop {
            if parts.len() <= MAX_COMPOSABLE {
                break self
                    .api
                    .compose_object(bucket, key, parts, if_generation_match)
                    .await
                    .map(|_| ())
                    .map_err(|err| handle_error(bucket, key, err));
            }

            let intermediate = part_key(&Uuid::new_v4().to_string(), key);
            let chunk = parts.drain(..MAX_COMPOSABLE).collect();

            // Preconditions only apply to the destination, never the intermediates
            let composed = self.api.compose_object(bucket, &intermediate, chunk, None).await;

            if let Err(err) = composed {
                break Err(handle_error(bucket, &intermediate, err));
            }

            parts.insert(0, intermediate.clone());
            intermediates.push(intermediate);
        };

        self.cleanup(bucket, intermediates).await;

        result
    }

    /// Attempts to remove the given intermediate objects, logging rather than failing when
    /// removal is unsuccessful.
    async fn cleanup(&self, bucket: &str, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }

        let result = self
            .delete_objects(DeleteObjectsOptions { bucket: bucket.to_string(), keys: keys.clone() })
            .await;

        if let Err(err) = result {
            error!(?keys, %err, "failed to cleanup intermediate objects, remove them manually");
        }
    }
}

/// Returns the key an in-progress part should be uploaded to; parts share the
/// '{key}-mpu-{upload id}' prefix within the key's directory, allowing efficient listing.
fn part_key(upload_id: &str, key: &str) -> String {
    let name = format!("{}-mpu-{}-{}", basename(key), upload_id, Uuid::new_v4());

    match dirname(key) {
        "" => name,
        dir => format!("{dir}/{name}"),
    }
}

/// Returns the prefix shared by every part in the given upload.
fn part_prefix(upload_id: &str, key: &str) -> String {
    format!("{key}-mpu-{upload_id}")
}

/// The service identifies versions by numeric generation; surfaced as an opaque string.
fn parse_generation(bucket: &str, key: &str, version_id: &str) -> Result<i64> {
    version_id.parse().map_err(|err| {
        handle_error(
            bucket,
            key,
            ApiError::new(None, &format!("failed to parse version id as a generation: {err}")),
        )
    })
}

fn version_id(versions: bool, meta: &ObjectMeta) -> Option<String> {
    (versions && meta.generation != 0).then(|| meta.generation.to_string())
}

/// The service enforces retention through bucket policies which cannot be overridden, the
/// behaviour of a compliance lock.
fn lock_type(meta: &ObjectMeta) -> LockType {
    match meta.retention_expires {
        Some(_) => LockType::Compliance,
        None => LockType::Undefined,
    }
}

fn to_attrs(key: String, meta: &ObjectMeta) -> ObjectAttrs {
    let version = (meta.generation != 0).then(|| meta.generation.to_string());

    ObjectAttrs {
        key,
        size: meta.size,
        etag: version.clone(),
        last_modified: meta.updated,
        version_id: version,
        is_current_version: meta.deleted_at.is_none(),
        lock_type: lock_type(meta),
        lock_expiration: meta.retention_expires,
        ..Default::default()
    }
}

fn precondition_generation(
    bucket: &str,
    key: &str,
    precondition: Option<&Precondition>,
) -> Result<Option<i64>> {
    match precondition {
        // A generation of zero matches only when no live generation exists
        Some(Precondition::OnlyIfAbsent) => Ok(Some(0)),
        Some(Precondition::IfMatch(generation)) => {
            Ok(Some(parse_generation(bucket, key, generation)?))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl ObjectClient for GcpClient {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let generation = match &opts.version_id {
            Some(version) => Some(parse_generation(&opts.bucket, &opts.key, version)?),
            None => None,
        };

        let resp = self
            .api
            .read_object(ReadObjectInput {
                bucket: opts.bucket.clone(),
                key: opts.key.clone(),
                generation,
                range: opts.byte_range,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(Object { attrs: to_attrs(opts.key, &resp.meta), body: resp.body })
    }

    async fn get_object_attrs(&self, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs> {
        let generation = match &opts.version_id {
            Some(version) => Some(parse_generation(&opts.bucket, &opts.key, version)?),
            None => None,
        };

        let meta = self
            .api
            .object_meta(&opts.bucket, &opts.key, generation)
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(to_attrs(opts.key, &meta))
    }

    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        // The SDK does not expose per-object retention, locks cannot be applied at write time
        if opts.lock.is_some() {
            return Err(Error::UnsupportedOperation);
        }

        let if_generation_match =
            precondition_generation(&opts.bucket, &opts.key, opts.precondition.as_ref())?;

        let meta = self
            .api
            .write_object(WriteObjectInput {
                bucket: opts.bucket.clone(),
                key: opts.key.clone(),
                body: opts.body,
                if_generation_match,
            })
            .await
            .map_err(|err| handle_error(&opts.bucket, &opts.key, err))?;

        Ok(to_attrs(opts.key, &meta))
    }

    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs> {
        let meta = self
            .api
            .copy_object(
                &opts.source_bucket,
                &opts.source_key,
                &opts.destination_bucket,
                &opts.destination_key,
            )
            .await
            .map_err(|err| {
                handle_error(&opts.destination_bucket, &opts.destination_key, err)
            })?;

        Ok(to_attrs(opts.destination_key, &meta))
    }

    async fn append_to_object(&self, opts: AppendToObjectOptions) -> Result<()> {
        let attrs = self
            .get_object_attrs(GetObjectAttrsOptions {
                bucket: opts.bucket.clone(),
                key: opts.key.clone(),
                ..Default::default()
            })
            .await;

        // An absent or empty object is created, rather than appended to
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

        let attrs = attrs?;

        let id = self
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: opts.bucket.clone(),
                key: opts.key.clone(),
                ..Default::default()
            })
            .await?;

        let appended = self
            .upload_part(UploadPartOptions {
                bucket: opts.bucket.clone(),
                upload_id: id.clone(),
                key: opts.key.clone(),
                number: 2,
                body: opts.body,
            })
            .await?;

        // The object itself is the first part; composition reuses it in place
        let existing = Part {
            id: opts.key.clone(),
            number: 1,
            size: attrs.size.unwrap_or_default(),
        };

        self.complete_multipart_upload(CompleteMultipartUploadOptions {
            bucket: opts.bucket,
            upload_id: id,
            key: opts.key,
            parts: vec![existing, appended],
            ..Default::default()
        })
        .await
    }

    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()> {
        let objects = opts.keys.into_iter().map(|key| (key, None)).collect();

        self.delete_generations(&opts.bucket, objects).await
    }

    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()> {
        let objects = opts
            .versions
            .into_iter()
            .map(|version| (version.key, Some(version.version_id)))
            .collect();

        self.delete_generations(&opts.bucket, objects).await
    }

    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()> {
        let mut batch: Vec<(String, Option<String>)> = Vec::new();
        let mut batches = Vec::new();

        let list = IterateObjectsOptions {
            bucket: opts.bucket.clone(),
            prefix: opts.prefix.clone(),
            versions: opts.versions,
            ..Default::default()
        };

        let now = chrono::Utc::now();

        self.list_pages(&list, |attrs| {
            if crate::client::under_retention(&attrs, now) {
                return Err(Error::RetentionNotExpired {
                    bucket: opts.bucket.clone(),
                    key: attrs.key,
                });
            }

            if attrs.is_delete_marker {
                return Ok(());
            }

            let version_id = opts.versions.then_some(attrs.version_id).flatten();

            batch.push((attrs.key, version_id));

            if batch.len() >= DELETE_BATCH_SIZE {
                batches.push(std::mem::take(&mut batch));
            }

            Ok(())
        })
        .await?;

        batches.push(batch);

        for batch in batches {
            if batch.is_empty() {
                continue;
            }

            self.delete_generations(&opts.bucket, batch).await?;
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
        // Uploads are purely client-side; the id only namespaces the intermediate part objects
        Ok(Uuid::new_v4().to_string())
    }

    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>> {
        let mut parts = Vec::new();

        let list = IterateObjectsOptions {
            bucket: opts.bucket.clone(),
            prefix: part_prefix(&opts.upload_id, &opts.key),
            delimiter: Some("/".to_string()),
            ..Default::default()
        };

        self.list_pages(&list, |attrs| {
            parts.push(Part {
                id: attrs.key,
                size: attrs.size.unwrap_or_default(),
                ..Default::default()
            });

            Ok(())
        })
        .await?;

        Ok(parts)
    }

    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part> {
        let intermediate = part_key(&opts.upload_id, &opts.key);
        let size = opts.body.len() as u64;

        self.put_object(PutObjectOptions {
            bucket: opts.bucket,
            key: intermediate.clone(),
            body: opts.body,
            ..Default::default()
        })
        .await?;

        Ok(Part { id: intermediate, number: opts.number, size })
    }

    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let attrs = self
            .get_object_attrs(GetObjectAttrsOptions {
                bucket: opts.source_bucket.clone(),
                key: opts.source_key.clone(),
                ..Default::default()
            })
            .await?;

        let size = attrs.size.unwrap_or_default();

        // The service cannot copy a byte range; a range covering the whole object is accepted
        let whole = match &opts.byte_range {
            Some(range) => range.start == 0 && range.end == Some(size.saturating_sub(1)),
            None => true,
        };

        if !whole {
            return Err(Error::UnsupportedOperation);
        }

        let intermediate = part_key(&opts.upload_id, &opts.destination_key);

        self.api
            .copy_object(
                &opts.source_bucket,
                &opts.source_key,
                &opts.destination_bucket,
                &intermediate,
            )
            .await
            .map_err(|err| handle_error(&opts.destination_bucket, &intermediate, err))?;

        Ok(Part { id: intermediate, number: opts.number, size })
    }

    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()> {
        // The SDK does not expose per-object retention, locks cannot be applied at write time
        if opts.lock.is_some() {
            return Err(Error::UnsupportedOperation);
        }

        let if_generation_match =
            precondition_generation(&opts.bucket, &opts.key, opts.precondition.as_ref())?;

        let parts: Vec<String> = opts.parts.into_iter().map(|part| part.id).collect();

        self.compose_all(&opts.bucket, &opts.key, parts.clone(), if_generation_match).await?;

        // Composition may reference the destination object itself; never delete it as a part
        let leftover = parts.into_iter().filter(|part| part != &opts.key).collect();

        self.cleanup(&opts.bucket, leftover).await;

        Ok(())
    }

    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()> {
        self.delete_directory(DeleteDirectoryOptions {
            bucket: opts.bucket,
            prefix: part_prefix(&opts.upload_id, &opts.key),
            versions: false,
        })
        .await
    }

    async fn get_bucket_versioning_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus> {
        let enabled = self
            .api
            .bucket_versioning(&opts.bucket)
            .await
            .map_err(|err| handle_error(&opts.bucket, "", err))?;

        Ok(BucketVersioningStatus { enabled })
    }

    async fn get_bucket_locking_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus> {
        let enabled = self
            .api
            .bucket_locking(&opts.bucket)
            .await
            .map_err(|err| handle_error(&opts.bucket, "", err))?;

        Ok(BucketLockingStatus { enabled })
    }

    async fn set_object_lock(&self, _opts: SetObjectLockOptions) -> Result<()> {
        // The SDK does not expose per-object retention
        Err(Error::UnsupportedOperation)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts a storage error into a user friendly error where possible; the service reports
/// failures by HTTP status rather than by named code.
fn handle_error(bucket: &str, key: &str, err: ApiError) -> Error {
    if err.unreachable {
        return Error::EndpointUnreachable;
    }

    match err.code() {
        Some("401") => Error::Unauthenticated,
        Some("403") => Error::Unauthorized,
        Some("412") => Error::PreconditionFailed { key: key.to_string() },
        Some("404") if err.message.contains("bucket") => Error::not_found("bucket", bucket),
        Some("404") => Error::not_found("key", key),
        _ => Error::Provider { provider: Provider::Gcp, source: Box::new(err) },
    }
}

/// Returns whether the given error means the object being operated on did not exist.
fn is_key_not_found(err: &ApiError) -> bool {
    err.code() == Some("404") && !err.message.contains("bucket")
}
