//! Token bucket rate limiting which may be composed around any client/body stream.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::{Duration, Instant};

use crate::client::{
    AbortMultipartUploadOptions, AppendToObjectOptions, BucketStatusOptions,
    CompleteMultipartUploadOptions, CopyObjectOptions, CreateMultipartUploadOptions,
    DeleteDirectoryOptions, DeleteObjectVersionsOptions, DeleteObjectsOptions,
    GetObjectAttrsOptions, GetObjectOptions, IterateFunc, IterateObjectsOptions, ListPartsOptions,
    ObjectClient, PutObjectOptions, SetObjectLockOptions, UploadPartCopyOptions,
    UploadPartOptions,
};
use crate::error::Result;
use crate::values::{
    BucketLockingStatus, BucketVersioningStatus, Object, ObjectAttrs, ObjectBody, Part, Provider,
};

/// A token bucket limiter where tokens are bytes; the bucket refills at 'rate' bytes per second
/// up to a maximum of 'burst' bytes.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: usize,
    state: parking_lot::Mutex<State>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    refilled: Instant,
}

impl RateLimiter {
    /// Creates a new limiter allowing 'rate' bytes per second with the given burst size; the
    /// bucket starts full.
    pub fn new(rate: u64, burst: usize) -> Self {
        let burst = burst.max(1);

        RateLimiter {
            rate: (rate.max(1)) as f64,
            burst,
            state: parking_lot::Mutex::new(State { tokens: burst as f64, refilled: Instant::now() }),
        }
    }

    /// Waits until n tokens are available, draining them.
    ///
    /// The bucket will only ever hold at most the burst number of tokens, so waits larger than
    /// that are broken up into burst sized chunks; dropping the returned future whilst blocked
    /// releases the wait without draining anything further.
    pub async fn wait_for(&self, n: usize) {
        let mut remaining = n;

        while remaining > 0 {
            let chunk = remaining.min(self.burst);
            self.wait_chunk(chunk).await;
            remaining -= chunk;
        }
    }

    async fn wait_chunk(&self, n: usize) {
        loop {
            let wait = {
                let mut state = self.state.lock();

                let now = Instant::now();
                let elapsed = now.duration_since(state.refilled).as_secs_f64();

                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst as f64);
                state.refilled = now;

                if state.tokens >= n as f64 {
                    state.tokens -= n as f64;
                    return;
                }

                Duration::from_secs_f64((n as f64 - state.tokens) / self.rate)
            };

            tokio::time::sleep(wait).await;
        }
    }
}

/// Wraps the given body stream so that chunks are only yielded as fast as the limiter allows.
pub fn rate_limited_body(body: ObjectBody, limiter: Arc<RateLimiter>) -> ObjectBody {
    body.then(move |chunk| {
        let limiter = Arc::clone(&limiter);

        async move {
            if let Ok(chunk) = &chunk {
                limiter.wait_for(chunk.len()).await;
            }

            chunk
        }
    })
    .boxed()
}

/// A client decorator which rate limits the operations that transfer object data; everything
/// else is delegated untouched.
pub struct RateLimitedClient {
    inner: Arc<dyn ObjectClient>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn ObjectClient>, limiter: Arc<RateLimiter>) -> Self {
        RateLimitedClient { inner, limiter }
    }
}

#[async_trait]
impl ObjectClient for RateLimitedClient {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn get_object(&self, opts: GetObjectOptions) -> Result<Object> {
        let mut object = self.inner.get_object(opts).await?;
        object.body = rate_limited_body(object.body, Arc::clone(&self.limiter));

        Ok(object)
    }

    async fn get_object_attrs(&self, opts: GetObjectAttrsOptions) -> Result<ObjectAttrs> {
        self.inner.get_object_attrs(opts).await
    }

    async fn put_object(&self, opts: PutObjectOptions) -> Result<ObjectAttrs> {
        self.limiter.wait_for(opts.body.len()).await;
        self.inner.put_object(opts).await
    }

    async fn copy_object(&self, opts: CopyObjectOptions) -> Result<ObjectAttrs> {
        self.inner.copy_object(opts).await
    }

    async fn append_to_object(&self, opts: AppendToObjectOptions) -> Result<()> {
        self.limiter.wait_for(opts.body.len()).await;
        self.inner.append_to_object(opts).await
    }

    async fn delete_objects(&self, opts: DeleteObjectsOptions) -> Result<()> {
        self.inner.delete_objects(opts).await
    }

    async fn delete_object_versions(&self, opts: DeleteObjectVersionsOptions) -> Result<()> {
        self.inner.delete_object_versions(opts).await
    }

    async fn delete_directory(&self, opts: DeleteDirectoryOptions) -> Result<()> {
        self.inner.delete_directory(opts).await
    }

    async fn iterate_objects(
        &self,
        opts: IterateObjectsOptions,
        func: IterateFunc<'_>,
    ) -> Result<()> {
        self.inner.iterate_objects(opts, func).await
    }

    async fn create_multipart_upload(&self, opts: CreateMultipartUploadOptions) -> Result<String> {
        self.inner.create_multipart_upload(opts).await
    }

    async fn list_parts(&self, opts: ListPartsOptions) -> Result<Vec<Part>> {
        self.inner.list_parts(opts).await
    }

    async fn upload_part(&self, opts: UploadPartOptions) -> Result<Part> {
        self.limiter.wait_for(opts.body.len()).await;
        self.inner.upload_part(opts).await
    }

    async fn upload_part_copy(&self, opts: UploadPartCopyOptions) -> Result<Part> {
        self.inner.upload_part_copy(opts).await
    }

    async fn complete_multipart_upload(&self, opts: CompleteMultipartUploadOptions) -> Result<()> {
        self.inner.complete_multipart_upload(opts).await
    }

    async fn abort_multipart_upload(&self, opts: AbortMultipartUploadOptions) -> Result<()> {
        self.inner.abort_multipart_upload(opts).await
    }

    async fn get_bucket_versioning_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketVersioningStatus> {
        self.inner.get_bucket_versioning_status(opts).await
    }

    async fn get_bucket_locking_status(
        &self,
        opts: BucketStatusOptions,
    ) -> Result<BucketLockingStatus> {
        self.inner.get_bucket_locking_status(opts).await
    }

    async fn set_object_lock(&self, opts: SetObjectLockOptions) -> Result<()> {
        self.inner.set_object_lock(opts).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
