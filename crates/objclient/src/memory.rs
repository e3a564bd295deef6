//! An in-memory client, useful for unit testing without mocking a cloud provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
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
use crate::values::{
    validate_range, BucketLockingStatus, BucketVersioningStatus, Object, ObjectAttrs, ObjectLock,
    Part, Provider,
};

#[derive(Debug, Clone)]
struct StoredObject {
    attrs: ObjectAttrs,
    body: Bytes,
}

type Bucket = BTreeMap<String, StoredObject>;

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, Bucket>,
}

/// An implementation of 'ObjectClient' which stores state in memory; buckets are created
/// implicitly as they're written to.
#[derive(Debug)]
pub struct MemoryClient {
    provider: Provider,
    versioning: bool,
    locking: bool,
    state: parking_lot::Mutex<State>,
}

impl MemoryClient {
    /// Creates a new empty client which reports the given provider.
    pub fn new(provider: Provider) -> Self {
        MemoryClient {
            provider,
            versioning: false,
            locking: false,
            state: parking_lot::Mutex::new(State::default()),
        }
    }

    /// Enables bucket versioning for all buckets.
    pub fn with_versioning(mut self) -> Self {
        self.versioning = true;
        self
    }

    /// Enables object locking for all buckets.
    pub fn with_locking(mut self) -> Self {
        self.locking = true;
        self
    }

    fn get_stored(state: &State, bucket: &str, key: &str) -> Result<StoredObject> {
        state
            .buckets
            .get(bucket)
            .and_then(|bucket| bucket.get(key))
            .cloned()
            .ok_or_else(|| Error::not_found("object", key))
    }

    fn put_stored(state: &mut State, bucket: &str, key: &str, body: Bytes) -> ObjectAttrs {
        let attrs = ObjectAttrs {
            key: key.to_string(),
            size: Some(body.len() as u64),
            last_modified: Some(Utc::now()),
            etag: Some(Uuid::new_v4().simple().to_string()),
            version_id: Some(Uuid::new_v4().simple().to_string()),
            is_current_version: true,
            ..Default::default()
        };

        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { attrs: attrs.clone(), body });

        attrs
    }

    fn apply_lock(state: &mut State, bucket: &str, key: &str, lock: &ObjectLock) -> Result<()> {
        let stored = state
            .buckets
            .get_mut(bucket)
            .and_then(|bucket| bucket.get_mut(key))
            .ok_or_else(|| Error::not_found("object", key))?;

        stored.attrs.lock_type = lock.lock_type;
        stored.attrs.lock_expiration = Some(lock.expiration);

        Ok(())
    }

    fn check_precondition(
        state: &State,
        bucket: &str,
        key: &str,
        precondition: Option<&Precondition>,
    ) -> Result<()> {
        let existing = state.buckets.get(bucket).and_then(|bucket| bucket.get(key));

        match precondition {
            Some(Precondition::OnlyIfAbsent) if existing.is_some() => {
                Err(Error::PreconditionFailed { key: key.to_string() })
            }
            Some(Precondition::IfMatch(etag)) if existing.and_then(|o| o.attrs.etag.as_deref()) != Some(etag) => {
                Err(Error::PreconditionFailed { key: key.to_string() })
            }
            _ => Ok(()),
        }
    }

    fn delete_prefix(state: &mut State, bucket: &str, prefix: &str) {
        if let Some(bucket) = state.buckets.get_mut(bucket) {
            bucket.retain(|key, _| !key.starts_with(prefix));
        }
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let stored = Self::get_stored(&self.state.lock(), &opts.bucket, &opts.key)?;

        let body = match opts.byte_range {
            Some(range) => {
                let end = range
                    .end
                    .map(|end| end as usize + 1)
                    .unwrap_or(stored.body.len())
                    .min(stored.body.len());
                let start = (range.start as usize).min(end);

                stored.body.slice(start..end)
            }
            None => stored.body,
        };

        let attrs = ObjectAttrs { size: Some(body.len() as u64), ..stored.attrs };

        Ok(Object { attrs, body: futures::stream::iter([Ok(body)]).boxed() })
    }

    async fn get_object_attrs(&self, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs> {
        Ok(Self::get_stored(&self.state.lock(), &opts.bucket, &opts.key)?.attrs)
    }

    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        let mut state = self.state.lock();

        Self::check_precondition(&state, &opts.bucket, &opts.key, opts.precondition.as_ref())?;

        let attrs = Self::put_stored(&mut state, &opts.bucket, &opts.key, opts.body);

        if let Some(lock) = &opts.lock {
            Self::apply_lock(&mut state, &opts.bucket, &opts.key, lock)?;
        }

        Ok(attrs)
    }

    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs> {
        let mut state = self.state.lock();

        let source = Self::get_stored(&state, &opts.source_bucket, &opts.source_key)?;

        Ok(Self::put_stored(&mut state, &opts.destination_bucket, &opts.destination_key, source.body))
    }

    async fn append_to_object(&self, opts: AppendToObjectOptions) -> Result<()> {
        let mut state = self.state.lock();

        let body = match Self::get_stored(&state, &opts.bucket, &opts.key) {
            Ok(existing) => {
                let mut combined = BytesMut::with_capacity(existing.body.len() + opts.body.len());
                combined.extend_from_slice(&existing.body);
                combined.extend_from_slice(&opts.body);
                combined.freeze()
            }
            Err(err) if err.is_not_found() => opts.body,
            Err(err) => return Err(err),
        };

        Self::put_stored(&mut state, &opts.bucket, &opts.key, body);

        Ok(())
    }

    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(bucket) = state.buckets.get_mut(&opts.bucket) {
            for key in &opts.keys {
                bucket.remove(key);
            }
        }

        Ok(())
    }

    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(bucket) = state.buckets.get_mut(&opts.bucket) {
            for version in &opts.versions {
                let matches = bucket
                    .get(&version.key)
                    .is_some_and(|o| o.attrs.version_id.as_deref() == Some(&version.version_id));

                if matches {
                    bucket.remove(&version.key);
                }
            }
        }

        Ok(())
    }

    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(bucket) = state.buckets.get(&opts.bucket) {
            let now = Utc::now();

            // Nothing is removed if anything under the prefix remains under retention
            for (key, stored) in bucket.range(opts.prefix.clone()..) {
                if !key.starts_with(&opts.prefix) {
                    break;
                }

                if crate::client::under_retention(&stored.attrs, now) {
                    return Err(Error::RetentionNotExpired {
                        bucket: opts.bucket.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        Self::delete_prefix(&mut state, &opts.bucket, &opts.prefix);

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

        let objects: Vec<(String, ObjectAttrs)> = {
            let state = self.state.lock();

            match state.buckets.get(&opts.bucket) {
                Some(bucket) => bucket
                    .iter()
                    .filter(|(key, _)| key.starts_with(&opts.prefix))
                    .map(|(key, stored)| (key.clone(), stored.attrs.clone()))
                    .collect(),
                None => return Ok(()),
            }
        };

        for (key, mut attrs) in objects {
            if should_ignore(&key, &opts.include, &opts.exclude) {
                continue;
            }

            // Keys nested beneath the delimiter collapse into a directory stub
            if let Some(delimiter) = &opts.delimiter {
                let trimmed = key.trim_start_matches(&opts.prefix);

                if trimmed.matches(delimiter.as_str()).count() > 1 {
                    attrs = ObjectAttrs {
                        key: root_directory(trimmed).to_string(),
                        ..Default::default()
                    };
                }
            }

            func(attrs).map_err(Error::Callback)?;
        }

        Ok(())
    }

    async fn create_multipart_upload(&self, _opts: CreateMultipartUploadOptions) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>> {
        let prefix = part_prefix(&opts.upload_id, &opts.key);
        let state = self.state.lock();

        let parts = match state.buckets.get(&opts.bucket) {
            Some(bucket) => bucket
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, stored)| Part {
                    id: key.clone(),
                    size: stored.body.len() as u64,
                    ..Default::default()
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(parts)
    }

    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part> {
        let mut state = self.state.lock();

        let size = opts.body.len() as u64;
        let attrs =
            Self::put_stored(&mut state, &opts.bucket, &part_key(&opts.upload_id, &opts.key), opts.body);

        Ok(Part { id: attrs.key, number: opts.number, size })
    }

    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part> {
        validate_range(opts.byte_range.as_ref(), false)?;

        let mut state = self.state.lock();

        let source = Self::get_stored(&state, &opts.source_bucket, &opts.source_key)?;

        let body = match opts.byte_range {
            Some(range) => {
                let end = range
                    .end
                    .map(|end| end as usize + 1)
                    .unwrap_or(source.body.len())
                    .min(source.body.len());

                source.body.slice((range.start as usize).min(end)..end)
            }
            None => source.body,
        };

        let size = body.len() as u64;

        let attrs = Self::put_stored(
            &mut state,
            &opts.destination_bucket,
            &part_key(&opts.upload_id, &opts.destination_key),
            body,
        );

        Ok(Part { id: attrs.key, number: opts.number, size })
    }

    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()> {
        let mut state = self.state.lock();

        Self::check_precondition(&state, &opts.bucket, &opts.key, opts.precondition.as_ref())?;

        let mut buffer = BytesMut::new();

        for part in &opts.parts {
            let stored = Self::get_stored(&state, &opts.bucket, &part.id)?;
            buffer.extend_from_slice(&stored.body);
        }

        Self::put_stored(&mut state, &opts.bucket, &opts.key, buffer.freeze());

        if let Some(lock) = &opts.lock {
            Self::apply_lock(&mut state, &opts.bucket, &opts.key, lock)?;
        }

        Self::delete_prefix(&mut state, &opts.bucket, &part_prefix(&opts.upload_id, &opts.key));

        Ok(())
    }

    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()> {
        let mut state = self.state.lock();

        Self::delete_prefix(&mut state, &opts.bucket, &part_prefix(&opts.upload_id, &opts.key));

        Ok(())
    }

    async fn get_bucket_versioning_status(
        &self,
        _opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus> {
        Ok(BucketVersioningStatus { enabled: self.versioning })
    }

    async fn get_bucket_locking_status(
        &self,
        _opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus> {
        Ok(BucketLockingStatus { enabled: self.locking })
    }

    async fn set_object_lock(&self, opts: SetObjectLockOptions) -> Result<()> {
        Self::apply_lock(&mut self.state.lock(), &opts.bucket, &opts.key, &opts.lock)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Returns the key for a new part of an in-progress upload; parts share a common prefix
/// allowing efficient listing upon completion.
fn part_key(upload_id: &str, key: &str) -> String {
    let dir = dirname(key);
    let name = format!("{}-mpu-{}-{}", basename(key), upload_id, Uuid::new_v4());

    if dir.is_empty() {
        name
    } else {
        format!("{dir}/{name}")
    }
}

/// Returns the prefix shared by all parts in the given upload for the provided key.
fn part_prefix(upload_id: &str, key: &str) -> String {
    format!("{key}-mpu-{upload_id}")
}

/// Returns the first path component of the given key.
fn root_directory(key: &str) -> &str {
    key.trim_start_matches('/').split('/').next().unwrap_or(key)
}
