//! Iteration filtering tests; include/exclude expressions and delimiter grouping.

use std::sync::Arc;

use objclient::{Error, IterateObjectsOptions, ObjectClient};
use regex::Regex;

use super::helpers::{all_clients, memory_client, put, BUCKET};

async fn keys(
    client: &Arc<dyn ObjectClient>,
    opts: IterateObjectsOptions,
) -> Result<Vec<String>, Error> {
    let mut keys = Vec::new();

    client
        .iterate_objects(opts, &mut |attrs| {
            keys.push(attrs.key);
            Ok(())
        })
        .await?;

    Ok(keys)
}

#[tokio::test]
async fn includes_match_the_basename() {
    for client in all_clients() {
        put(&client, "a/key1", b"1").await;
        put(&client, "b/key1", b"2").await;
        put(&client, "a/key2", b"3").await;

        let listed = keys(
            &client,
            IterateObjectsOptions {
                bucket: BUCKET.to_string(),
                include: vec![Regex::new("^key1$").unwrap()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Both 'key1' objects match by basename, regardless of their directory
        assert_eq!(listed, vec!["a/key1".to_string(), "b/key1".to_string()]);
    }
}

#[tokio::test]
async fn excludes_match_the_full_key() {
    for client in all_clients() {
        put(&client, "backups/manifest.json", b"1").await;
        put(&client, "data/manifest.json", b"2").await;

        let listed = keys(
            &client,
            IterateObjectsOptions {
                bucket: BUCKET.to_string(),
                exclude: vec![Regex::new("^backups/").unwrap()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(listed, vec!["data/manifest.json".to_string()]);
    }
}

#[tokio::test]
async fn include_and_exclude_are_mutually_exclusive() {
    for client in all_clients() {
        let err = keys(
            &client,
            IterateObjectsOptions {
                bucket: BUCKET.to_string(),
                include: vec![Regex::new("a").unwrap()],
                exclude: vec![Regex::new("b").unwrap()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::IncludeAndExclude));
    }
}

#[tokio::test]
async fn callback_errors_stop_iteration_and_propagate_unwrapped() {
    let client = memory_client();

    put(&client, "key1", b"1").await;
    put(&client, "key2", b"2").await;

    let mut seen = 0;

    let err = client
        .iterate_objects(
            IterateObjectsOptions { bucket: BUCKET.to_string(), ..Default::default() },
            &mut |_| {
                seen += 1;
                Err("stop right there".into())
            },
        )
        .await
        .unwrap_err();

    assert_eq!(seen, 1);
    assert_eq!(err.to_string(), "stop right there");
    assert!(matches!(err, Error::Callback(_)));
}

#[tokio::test]
async fn delimiter_collapses_nested_keys_into_directories() {
    let client = memory_client();

    put(&client, "top.txt", b"1").await;
    put(&client, "nested/a/deep.txt", b"2").await;

    let mut dirs = Vec::new();

    client
        .iterate_objects(
            IterateObjectsOptions {
                bucket: BUCKET.to_string(),
                delimiter: Some("/".to_string()),
                ..Default::default()
            },
            &mut |attrs| {
                if attrs.is_dir() {
                    dirs.push(attrs.key);
                }

                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(dirs, vec!["nested".to_string()]);
}
