//! Tests for the semantics every client implementation shares.

use bytes::Bytes;
use objclient::{
    AppendToObjectOptions, ByteRange, DeleteObjectsOptions, Error, GetObjectOptions,
    PutObjectOptions, Precondition,
};

use super::helpers::{all_clients, get, put, BUCKET};

#[tokio::test]
async fn append_to_an_absent_object_is_a_put() {
    for client in all_clients() {
        client
            .append_to_object(AppendToObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap();

        assert_eq!(get(&client, "key").await, Bytes::from_static(b"value"));
    }
}

#[tokio::test]
async fn append_concatenates_binary_data() {
    for client in all_clients() {
        put(&client, "key", b"start").await;

        client
            .append_to_object(AppendToObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                body: Bytes::from_static(b"-end"),
            })
            .await
            .unwrap();

        assert_eq!(get(&client, "key").await, Bytes::from_static(b"start-end"));
    }
}

#[tokio::test]
async fn byte_ranges_are_validated_before_any_call() {
    for client in all_clients() {
        // The object doesn't exist; an invalid range must fail first
        let err = client
            .get_object(GetObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                byte_range: Some(ByteRange::new(128, 64)),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidByteRange { start: 128, end: 64 }));
    }
}

#[test]
fn byte_range_length_saturates_at_the_final_byte() {
    let range = ByteRange::new(0, u64::MAX);

    assert_eq!(range.len(), Some(u64::MAX));
    assert_eq!(range.to_offset_length(), (0, Some(u64::MAX)));

    assert_eq!(ByteRange::new(2, 5).len(), Some(4));
    assert_eq!(ByteRange::from_offset(6).len(), None);
}

#[tokio::test]
async fn byte_range_reads_are_inclusive() {
    for client in all_clients() {
        put(&client, "key", b"0123456789").await;

        let object = client
            .get_object(GetObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                byte_range: Some(ByteRange::new(2, 5)),
                ..Default::default()
            })
            .await
            .unwrap();

        let body = objclient::read_body(object.body).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"2345"));
    }
}

#[tokio::test]
async fn open_ended_byte_range_reads_to_the_end() {
    for client in all_clients() {
        put(&client, "key", b"0123456789").await;

        let object = client
            .get_object(GetObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                byte_range: Some(ByteRange::from_offset(6)),
                ..Default::default()
            })
            .await
            .unwrap();

        let body = objclient::read_body(object.body).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"6789"));
    }
}

#[tokio::test]
async fn only_if_absent_rejects_an_existing_object() {
    for client in all_clients() {
        put(&client, "key", b"value").await;

        let err = client
            .put_object(PutObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                body: Bytes::from_static(b"other"),
                precondition: Some(Precondition::OnlyIfAbsent),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PreconditionFailed { .. }));

        // The losing write must not have clobbered anything
        assert_eq!(get(&client, "key").await, Bytes::from_static(b"value"));
    }
}

#[tokio::test]
async fn deleting_missing_keys_is_not_an_error() {
    for client in all_clients() {
        put(&client, "kept", b"value").await;

        client
            .delete_objects(DeleteObjectsOptions {
                bucket: BUCKET.to_string(),
                keys: vec!["missing".to_string(), "also-missing".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(get(&client, "kept").await, Bytes::from_static(b"value"));
    }
}

#[tokio::test]
async fn getting_a_missing_object_is_not_found() {
    for client in all_clients() {
        let err = client
            .get_object(GetObjectOptions {
                bucket: BUCKET.to_string(),
                key: "missing".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}
