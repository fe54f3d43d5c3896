use std::sync::Arc;

use campionari_sync::storage::{BlobStore, RootScope};

use crate::common::InMemoryFileApi;

fn store(api: Arc<InMemoryFileApi>) -> BlobStore {
    BlobStore::new(api, RootScope::AppFolder("Campionari".to_string()))
}

#[tokio::test]
async fn app_folder_is_created_once_and_reused() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api.clone());

    blobs.put_json("a.json", "{}").await.unwrap();
    blobs.put_json("b.json", "{}").await.unwrap();

    assert_eq!(api.call_count("find_folder"), 1);
    assert_eq!(api.call_count("create_folder"), 1);
}

#[tokio::test]
async fn existing_app_folder_is_not_recreated() {
    let api = Arc::new(InMemoryFileApi::new());
    api.seed_folder("Campionari");
    let blobs = store(api.clone());

    blobs.put_json("a.json", "{}").await.unwrap();

    assert_eq!(api.call_count("create_folder"), 0);
}

#[tokio::test]
async fn shared_root_skips_folder_resolution() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = BlobStore::new(api.clone(), RootScope::Shared("team-drive-1".to_string()));

    blobs.put_json("a.json", "{}").await.unwrap();

    assert_eq!(api.call_count("find_folder"), 0);
    assert_eq!(api.call_count("create_folder"), 0);
    assert_eq!(api.file_names(), vec!["a.json".to_string()]);
}

#[tokio::test]
async fn put_json_updates_in_place() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api.clone());

    let first = blobs.put_json("record.json", r#"{"v":1}"#).await.unwrap();
    let second = blobs.put_json("record.json", r#"{"v":2}"#).await.unwrap();

    assert_eq!(first.id, second.id, "upsert must not create a duplicate");
    assert_eq!(api.call_count("create"), 1);
    assert_eq!(api.call_count("update"), 1);
    assert_eq!(api.content_of("record.json").unwrap(), r#"{"v":2}"#);
}

#[tokio::test]
async fn find_by_name_returns_none_for_missing() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api);
    assert!(blobs.find_by_name("nothing.json").await.unwrap().is_none());
}

#[tokio::test]
async fn find_by_prefix_scopes_to_matching_names() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api);

    blobs.put_json("supplier-s1-header.json", "{}").await.unwrap();
    blobs.put_json("supplier-s1-item-i1.json", "{}").await.unwrap();
    blobs.put_json("supplier-s2-header.json", "{}").await.unwrap();

    let mut names: Vec<String> = blobs
        .find_by_prefix("supplier-s1-")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "supplier-s1-header.json".to_string(),
            "supplier-s1-item-i1.json".to_string()
        ]
    );
}

#[tokio::test]
async fn delete_tolerates_already_missing_blob() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api.clone());

    let blob = blobs.put_json("gone.json", "{}").await.unwrap();
    blobs.delete(&blob.id).await.unwrap();
    blobs.delete(&blob.id).await.unwrap();
}

#[tokio::test]
async fn get_content_rejects_non_utf8() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api);

    let blob = blobs
        .create_binary("raw.bin", "application/octet-stream", vec![0xff, 0xfe, 0x80])
        .await
        .unwrap();
    let err = blobs.get_content(&blob.id).await.unwrap_err();
    assert!(err.to_string().contains("UTF-8"));
}

#[tokio::test]
async fn make_public_failure_does_not_propagate() {
    let api = Arc::new(InMemoryFileApi::new());
    let blobs = store(api.clone());

    let blob = blobs.put_json("doc.json", "{}").await.unwrap();
    api.fail_next("make_public", 1);
    blobs.make_public(&blob.id).await;
    assert!(!api.is_public(&blob.id));

    blobs.make_public(&blob.id).await;
    assert!(api.is_public(&blob.id));
}
