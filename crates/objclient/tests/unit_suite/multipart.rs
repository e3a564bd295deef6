//! Multipart upload tests; ordering, part copies and abort cleanup.

use bytes::Bytes;
use objclient::{
    ByteRange, CompleteMultipartUploadOptions, CreateMultipartUploadOptions, Error,
    ListPartsOptions, UploadPartCopyOptions, UploadPartOptions,
};

use super::helpers::{all_clients, get, put, BUCKET};

#[tokio::test]
async fn completion_concatenates_parts_in_the_given_order() {
    for client in all_clients() {
        let id = client
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut parts = Vec::new();

        for (number, body) in [(1, &b"first-"[..]), (2, &b"second-"[..]), (3, &b"third"[..])] {
            let part = client
                .upload_part(UploadPartOptions {
                    bucket: BUCKET.to_string(),
                    upload_id: id.clone(),
                    key: "key".to_string(),
                    number,
                    body: Bytes::from_static(body),
                })
                .await
                .unwrap();

            parts.push(part);
        }

        client
            .complete_multipart_upload(CompleteMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                upload_id: id,
                key: "key".to_string(),
                parts,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(get(&client, "key").await, Bytes::from_static(b"first-second-third"));
    }
}

#[tokio::test]
async fn completion_removes_the_staged_parts() {
    for client in all_clients() {
        let id = client
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let part = client
            .upload_part(UploadPartOptions {
                bucket: BUCKET.to_string(),
                upload_id: id.clone(),
                key: "key".to_string(),
                number: 1,
                body: Bytes::from_static(b"value"),
            })
            .await
            .unwrap();

        client
            .complete_multipart_upload(CompleteMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                upload_id: id.clone(),
                key: "key".to_string(),
                parts: vec![part],
                ..Default::default()
            })
            .await
            .unwrap();

        let remaining = client
            .list_parts(ListPartsOptions {
                bucket: BUCKET.to_string(),
                upload_id: id,
                key: "key".to_string(),
            })
            .await
            .unwrap();

        assert!(remaining.is_empty());
    }
}

#[tokio::test]
async fn abort_leaves_no_residue() {
    for client in all_clients() {
        let id = client
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        for number in 1..=3 {
            client
                .upload_part(UploadPartOptions {
                    bucket: BUCKET.to_string(),
                    upload_id: id.clone(),
                    key: "key".to_string(),
                    number,
                    body: Bytes::from_static(b"value"),
                })
                .await
                .unwrap();
        }

        client
            .abort_multipart_upload(objclient::AbortMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                upload_id: id.clone(),
                key: "key".to_string(),
            })
            .await
            .unwrap();

        let remaining = client
            .list_parts(ListPartsOptions {
                bucket: BUCKET.to_string(),
                upload_id: id,
                key: "key".to_string(),
            })
            .await
            .unwrap();

        assert!(remaining.is_empty());

        // The destination key was never created
        let err = client
            .get_object(objclient::GetObjectOptions {
                bucket: BUCKET.to_string(),
                key: "key".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn part_copy_takes_a_byte_range_of_the_source() {
    for client in all_clients() {
        put(&client, "source", b"0123456789").await;

        let id = client
            .create_multipart_upload(CreateMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                key: "destination".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let part = client
            .upload_part_copy(UploadPartCopyOptions {
                destination_bucket: BUCKET.to_string(),
                upload_id: id.clone(),
                destination_key: "destination".to_string(),
                source_bucket: BUCKET.to_string(),
                source_key: "source".to_string(),
                number: 1,
                byte_range: Some(ByteRange::new(0, 4)),
            })
            .await
            .unwrap();

        assert_eq!(part.size, 5);

        client
            .complete_multipart_upload(CompleteMultipartUploadOptions {
                bucket: BUCKET.to_string(),
                upload_id: id,
                key: "destination".to_string(),
                parts: vec![part],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(get(&client, "destination").await, Bytes::from_static(b"01234"));
    }
}

#[tokio::test]
async fn part_copy_validates_the_range_first() {
    for client in all_clients() {
        let err = client
            .upload_part_copy(UploadPartCopyOptions {
                destination_bucket: BUCKET.to_string(),
                upload_id: "id".to_string(),
                destination_key: "destination".to_string(),
                source_bucket: BUCKET.to_string(),
                source_key: "missing".to_string(),
                number: 1,
                byte_range: Some(ByteRange::new(9, 3)),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidByteRange { start: 9, end: 3 }));
    }
}
