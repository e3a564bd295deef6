//! Test helper utilities.
//!
//! Small wrappers which cut down on the option-struct boilerplate when a test only cares
//! about a bucket/key/body triple.

use std::sync::Arc;

use bytes::Bytes;
use objclient::{
    GetObjectOptions, MemoryClient, ObjectClient, Provider, PutObjectOptions, RateLimitedClient,
    RateLimiter,
};

pub const BUCKET: &str = "bucket";

/// Creates a fresh in-memory client.
pub fn memory_client() -> Arc<dyn ObjectClient> {
    Arc::new(MemoryClient::new(Provider::Aws))
}

/// Creates a fresh in-memory client wrapped in a rate limited decorator generous enough
/// that no test ever blocks on it.
pub fn rate_limited_client() -> Arc<dyn ObjectClient> {
    let limiter = Arc::new(RateLimiter::new(u64::MAX / 2, usize::MAX / 2));

    Arc::new(RateLimitedClient::new(memory_client(), limiter))
}

/// Every client flavor the shared contract tests should run against.
pub fn all_clients() -> Vec<Arc<dyn ObjectClient>> {
    vec![memory_client(), rate_limited_client()]
}

/// Stores the given body under the given key.
pub async fn put(client: &Arc<dyn ObjectClient>, key: &str, body: &'static [u8]) {
    client
        .put_object(PutObjectOptions {
            bucket: BUCKET.to_string(),
            key: key.to_string(),
            body: Bytes::from_static(body),
            ..Default::default()
        })
        .await
        .unwrap();
}

/// Fetches the object with the given key and reads its body fully into memory.
pub async fn get(client: &Arc<dyn ObjectClient>, key: &str) -> Bytes {
    let object = client
        .get_object(GetObjectOptions {
            bucket: BUCKET.to_string(),
            key: key.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    objclient::read_body(object.body).await.unwrap()
}
