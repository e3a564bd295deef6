//! Object lock and retention tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use objclient::{
    DeleteDirectoryOptions, Error, GetObjectOptions, MemoryClient, ObjectClient, ObjectLock,
    Provider, PutObjectOptions, SetObjectLockOptions,
};

use super::helpers::{get, put, BUCKET};

fn locking_client() -> Arc<dyn ObjectClient> {
    Arc::new(MemoryClient::new(Provider::Aws).with_locking())
}

#[tokio::test]
async fn delete_directory_fails_while_a_lock_is_unexpired() {
    let client = locking_client();

    put(&client, "prefix/locked", b"locked").await;
    put(&client, "prefix/unlocked", b"unlocked").await;

    client
        .set_object_lock(SetObjectLockOptions {
            bucket: BUCKET.to_string(),
            key: "prefix/locked".to_string(),
            version_id: None,
            lock: ObjectLock::new_compliance(Utc::now() + Duration::hours(1)),
        })
        .await
        .unwrap();

    let err = client
        .delete_directory(DeleteDirectoryOptions {
            bucket: BUCKET.to_string(),
            prefix: "prefix/".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RetentionNotExpired { .. }));

    // Nothing under the prefix was deleted, including the unlocked object
    assert_eq!(get(&client, "prefix/locked").await, bytes::Bytes::from_static(b"locked"));
    assert_eq!(get(&client, "prefix/unlocked").await, bytes::Bytes::from_static(b"unlocked"));
}

#[tokio::test]
async fn delete_directory_succeeds_once_locks_expire() {
    let client = locking_client();

    put(&client, "prefix/expired", b"value").await;

    client
        .set_object_lock(SetObjectLockOptions {
            bucket: BUCKET.to_string(),
            key: "prefix/expired".to_string(),
            version_id: None,
            lock: ObjectLock::new_compliance(Utc::now() - Duration::hours(1)),
        })
        .await
        .unwrap();

    client
        .delete_directory(DeleteDirectoryOptions {
            bucket: BUCKET.to_string(),
            prefix: "prefix/".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = client
        .get_object(GetObjectOptions {
            bucket: BUCKET.to_string(),
            key: "prefix/expired".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn locks_may_be_applied_at_write_time() {
    let client = locking_client();

    let attrs = client
        .put_object(PutObjectOptions {
            bucket: BUCKET.to_string(),
            key: "key".to_string(),
            body: bytes::Bytes::from_static(b"value"),
            lock: Some(ObjectLock::new_compliance(Utc::now() + Duration::hours(1))),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(attrs.size.is_some());

    let attrs = client
        .get_object_attrs(objclient::GetObjectAttrsOptions {
            bucket: BUCKET.to_string(),
            key: "key".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(attrs.lock_type, objclient::LockType::Compliance);
    assert!(attrs.lock_expiration.is_some());
}

#[tokio::test]
async fn locking_status_reflects_the_bucket() {
    let client = locking_client();

    let status = client
        .get_bucket_locking_status(objclient::BucketStatusOptions {
            bucket: BUCKET.to_string(),
        })
        .await
        .unwrap();

    assert!(status.enabled);
}
