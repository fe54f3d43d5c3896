use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use campionari_sync::storage::LocalStore;
use campionari_sync::types::MutationContext;

use crate::common::{harness, inline_image, item, supplier};

fn two_supplier_catalog() -> Vec<campionari_sync::types::Supplier> {
    vec![
        supplier("s1", "Acme", vec![item("i1", "X1"), item("i2", "X2")]),
        supplier("s2", "Brixa", vec![item("j1", "Y1")]),
    ]
}

// ----------------------------------------------------------------------------
// Local save
// ----------------------------------------------------------------------------

#[tokio::test]
async fn save_local_touches_no_network() {
    let h = harness();
    let catalog = two_supplier_catalog();

    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();

    assert!(h.api.op_log().is_empty());
    assert!(h.manager.status().has_pending_changes);
    assert_eq!(h.manager.load_local(), catalog);
}

#[tokio::test]
async fn load_local_returns_empty_on_fresh_store() {
    let h = harness();
    assert!(h.manager.load_local().is_empty());
}

// ----------------------------------------------------------------------------
// Save protocol guards
// ----------------------------------------------------------------------------

#[tokio::test]
async fn sync_without_pending_changes_skips_network() {
    let h = harness();
    h.manager.sync_to_cloud().await.unwrap();

    assert!(h.api.op_log().is_empty());
    assert!(h.manager.status().last_sync.is_some());
}

#[tokio::test]
async fn sync_while_signed_out_is_a_noop() {
    let h = harness();
    h.identity.set_signed_in(false);
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    h.manager.sync_to_cloud().await.unwrap();

    assert!(h.api.op_log().is_empty());
    assert!(h.manager.status().has_pending_changes);
}

#[tokio::test]
async fn sync_while_offline_is_a_noop() {
    let h = harness();
    h.manager.handle_offline();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    h.manager.sync_to_cloud().await.unwrap();

    assert!(h.api.op_log().is_empty());
    assert!(h.manager.status().has_pending_changes);
}

// ----------------------------------------------------------------------------
// Granular flush
// ----------------------------------------------------------------------------

#[tokio::test]
async fn full_flush_writes_every_record_and_the_index() {
    let h = harness();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    h.manager.sync_to_cloud().await.unwrap();

    assert_eq!(
        h.api.file_names(),
        vec![
            "supplier-s1-header.json".to_string(),
            "supplier-s1-item-i1.json".to_string(),
            "supplier-s1-item-i2.json".to_string(),
            "supplier-s2-header.json".to_string(),
            "supplier-s2-item-j1.json".to_string(),
            "suppliers-index.json".to_string(),
        ]
    );
    let status = h.manager.status();
    assert!(!status.has_pending_changes);
    assert!(status.last_sync.is_some());
    assert!(!status.syncing);
    assert_eq!(h.local.get("campionari.pending-changes").unwrap(), None);
}

#[tokio::test]
async fn incremental_flush_uploads_only_dirty_records() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();
    let ops_before = h.api.op_log().len();

    catalog[0].items[0].price = "9.50".to_string();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemChanged {
                supplier_id: "s1".to_string(),
                item_id: "i1".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let new_ops: Vec<String> = h.api.op_log()[ops_before..].to_vec();
    let updates: Vec<&String> = new_ops.iter().filter(|op| op.starts_with("update:")).collect();
    let item_id = h.api.id_of("supplier-s1-item-i1.json").unwrap();
    let index_id = h.api.id_of("suppliers-index.json").unwrap();
    assert_eq!(updates.len(), 2, "only the item record and the index: {new_ops:?}");
    assert!(updates.iter().any(|op| op.contains(&item_id)));
    assert!(updates.iter().any(|op| op.contains(&index_id)));
    assert!(!new_ops.iter().any(|op| op.starts_with("create:")));
    assert!(h
        .api
        .content_of("supplier-s1-item-i1.json")
        .unwrap()
        .contains("9.50"));
}

#[tokio::test]
async fn header_flush_snapshots_current_item_order() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    catalog[0].items.swap(0, 1);
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemsReordered {
                supplier_id: "s1".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let header = h.api.content_of("supplier-s1-header.json").unwrap();
    let record: serde_json::Value = serde_json::from_str(&header).unwrap();
    let order: Vec<&str> = record["headerData"]["itemOrder"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(order, ["i2", "i1"]);
}

#[tokio::test]
async fn deletions_run_before_upserts() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();
    let ops_before = h.api.op_log().len();

    catalog.remove(1);
    catalog[0].header_data.notes = "updated".to_string();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::SupplierRemoved {
                supplier_id: "s2".to_string(),
            },
        )
        .unwrap();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::HeaderChanged {
                supplier_id: "s1".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let new_ops: Vec<String> = h.api.op_log()[ops_before..].to_vec();
    let first_delete = new_ops.iter().position(|op| op.starts_with("delete:"));
    let first_update = new_ops.iter().position(|op| op.starts_with("update:"));
    assert!(first_delete.unwrap() < first_update.unwrap(), "{new_ops:?}");

    let names = h.api.file_names();
    assert!(!names.iter().any(|n| n.starts_with("supplier-s2-")));
    assert!(!h
        .api
        .content_of("suppliers-index.json")
        .unwrap()
        .contains("s2"));
}

#[tokio::test]
async fn supplier_recreated_under_a_deleted_id_survives_the_flush() {
    let h = harness();
    let catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    // Delete s1, then re-add a supplier reusing the same id before the next
    // flush. The stale deletion intent must not wipe the new records.
    let mut catalog: Vec<_> = catalog.into_iter().filter(|s| s.id != "s1").collect();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::SupplierRemoved {
                supplier_id: "s1".to_string(),
            },
        )
        .unwrap();
    catalog.push(supplier("s1", "Acme Reborn", vec![item("k1", "Z1")]));
    h.manager
        .save_local(
            &catalog,
            &MutationContext::SupplierAdded {
                supplier_id: "s1".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let names = h.api.file_names();
    assert!(names.contains(&"supplier-s1-header.json".to_string()));
    assert!(names.contains(&"supplier-s1-item-k1.json".to_string()));
    assert!(
        !names.contains(&"supplier-s1-item-i1.json".to_string()),
        "records of the deleted incarnation are gone"
    );
    assert!(h
        .api
        .content_of("supplier-s1-header.json")
        .unwrap()
        .contains("Acme Reborn"));
    assert!(h
        .api
        .content_of("suppliers-index.json")
        .unwrap()
        .contains("Acme Reborn"));
}

#[tokio::test]
async fn item_deletion_removes_only_that_record() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    catalog[0].items.remove(1);
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemRemoved {
                supplier_id: "s1".to_string(),
                item_id: "i2".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let names = h.api.file_names();
    assert!(!names.contains(&"supplier-s1-item-i2.json".to_string()));
    assert!(names.contains(&"supplier-s1-item-i1.json".to_string()));
    assert!(names.contains(&"supplier-s1-header.json".to_string()));
}

#[tokio::test]
async fn untouched_item_timestamp_is_carried_forward() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();
    let first: serde_json::Value =
        serde_json::from_str(&h.api.content_of("suppliers-index.json").unwrap()).unwrap();
    let i2_stamp = first["suppliers"][0]["items"][1]["lastModified"].clone();

    tokio::time::sleep(Duration::from_millis(5)).await;
    catalog[0].items[0].price = "1".to_string();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemChanged {
                supplier_id: "s1".to_string(),
                item_id: "i1".to_string(),
            },
        )
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    let second: serde_json::Value =
        serde_json::from_str(&h.api.content_of("suppliers-index.json").unwrap()).unwrap();
    assert_eq!(second["suppliers"][0]["items"][1]["lastModified"], i2_stamp);
    assert_ne!(second["suppliers"][0]["items"][0]["lastModified"], i2_stamp);
}

// ----------------------------------------------------------------------------
// Flush failure
// ----------------------------------------------------------------------------

#[tokio::test]
async fn failed_flush_restores_dirty_state_for_the_next_attempt() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();

    catalog[0].items[0].price = "42".to_string();
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemChanged {
                supplier_id: "s1".to_string(),
                item_id: "i1".to_string(),
            },
        )
        .unwrap();

    h.api.fail_next("update", 1);
    assert!(h.manager.sync_to_cloud().await.is_err());
    let status = h.manager.status();
    assert!(status.has_pending_changes);
    assert!(!status.syncing);

    h.manager.sync_to_cloud().await.unwrap();
    assert!(!h.manager.status().has_pending_changes);
    assert!(h
        .api
        .content_of("supplier-s1-item-i1.json")
        .unwrap()
        .contains("42"));
}

// ----------------------------------------------------------------------------
// Image materialization during flush
// ----------------------------------------------------------------------------

#[tokio::test]
async fn flush_uploads_images_and_writes_references_back() {
    let h = harness();
    let mut catalog = two_supplier_catalog();
    catalog[0].header_data.business_card = Some(inline_image("card.png"));
    catalog[0].items[0].images.push(inline_image("front.png"));
    h.manager
        .save_local(&catalog, &MutationContext::Unknown)
        .unwrap();

    h.manager.sync_to_cloud().await.unwrap();

    let names = h.api.file_names();
    assert!(names.iter().any(|n| n.starts_with("s1_business-card_")));
    assert!(names.iter().any(|n| n.starts_with("s1_item_")));

    // Blob references flow back into the local snapshot.
    let reloaded = h.manager.load_local();
    let card = reloaded[0].header_data.business_card.as_ref().unwrap();
    assert!(card.blob_id.is_some());
    assert!(card.data_url.is_some());
    assert!(reloaded[0].items[0].images[0].blob_id.is_some());
}

#[tokio::test]
async fn image_upload_failure_does_not_abort_the_flush() {
    let h = harness();
    let mut catalog = vec![supplier("s1", "Acme", vec![item("i1", "X1")])];
    catalog[0].items[0].images.push(inline_image("front.png"));
    // Only the item is dirty, so the image upload is the first create.
    h.manager
        .save_local(
            &catalog,
            &MutationContext::ItemChanged {
                supplier_id: "s1".to_string(),
                item_id: "i1".to_string(),
            },
        )
        .unwrap();

    // The upload and its retry both fail; the record flush proceeds.
    h.api.fail_next("create", 2);
    h.manager.sync_to_cloud().await.unwrap();

    let reloaded = h.manager.load_local();
    let image = &reloaded[0].items[0].images[0];
    assert!(image.blob_id.is_none(), "degraded image keeps no blob reference");
    assert!(image.data_url.is_some(), "inline payload is preserved");
    assert!(h
        .api
        .file_names()
        .contains(&"supplier-s1-item-i1.json".to_string()));
    assert!(!h.manager.status().has_pending_changes);
}

// ----------------------------------------------------------------------------
// Load protocol
// ----------------------------------------------------------------------------

fn seed_remote(h: &crate::common::Harness) -> String {
    let root = h.api.seed_folder("Campionari");
    h.api.seed_file(
        &root,
        "supplier-s1-header.json",
        r#"{"id":"s1","name":"Acme","headerData":{"booth":"B12","itemOrder":["i2","i1"]}}"#,
    );
    h.api.seed_file(
        &root,
        "supplier-s1-item-i1.json",
        r#"{"supplierId":"s1","id":"i1","itemCode":"X1"}"#,
    );
    h.api.seed_file(
        &root,
        "supplier-s1-item-i2.json",
        r#"{"supplierId":"s1","id":"i2","itemCode":"X2"}"#,
    );
    h.api.seed_file(
        &root,
        "suppliers-index.json",
        r#"{"suppliers":[{"id":"s1","name":"Acme","headerLastModified":"T0","items":[{"id":"i1","itemCode":"X1","lastModified":"T0"},{"id":"i2","itemCode":"X2","lastModified":"T0"}]}],"lastUpdated":"T0"}"#,
    );
    root
}

#[tokio::test]
async fn pull_overwrites_local_state_and_clears_dirt() {
    let h = harness();
    seed_remote(&h);
    h.manager
        .save_local(
            &vec![supplier("stale", "Old", vec![])],
            &MutationContext::Unknown,
        )
        .unwrap();

    let catalog = h.manager.sync_from_cloud().await.unwrap();

    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog[0].id, "s1");
    assert_eq!(catalog[0].name, "Acme");
    assert_eq!(catalog[0].header_data.booth, "B12");
    assert_eq!(h.manager.load_local(), catalog);
    let status = h.manager.status();
    assert!(!status.has_pending_changes);
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn pull_applies_persisted_item_order() {
    let h = harness();
    seed_remote(&h);

    let catalog = h.manager.sync_from_cloud().await.unwrap();
    let ids: Vec<&str> = catalog[0].items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["i2", "i1"]);
}

#[tokio::test]
async fn pull_reconstructs_supplier_from_index_when_header_is_missing() {
    let h = harness();
    let root = h.api.seed_folder("Campionari");
    h.api.seed_file(
        &root,
        "supplier-s1-item-i1.json",
        r#"{"supplierId":"s1","id":"i1","itemCode":"X1"}"#,
    );
    h.api.seed_file(
        &root,
        "suppliers-index.json",
        r#"{"suppliers":[{"id":"s1","name":"Acme","headerLastModified":"T0","items":[{"id":"i1","itemCode":"X1","lastModified":"T0"}]}],"lastUpdated":"T0"}"#,
    );

    let catalog = h.manager.sync_from_cloud().await.unwrap();
    assert_eq!(catalog[0].name, "Acme");
    assert_eq!(catalog[0].items.len(), 1);
}

#[tokio::test]
async fn pull_skips_indexed_items_whose_record_is_gone() {
    let h = harness();
    seed_remote(&h);
    // Remove the record but leave the index entry stale.
    let orphan = h.api.id_of("supplier-s1-item-i2.json").unwrap();
    h.api.remove_file(&orphan);

    let catalog = h.manager.sync_from_cloud().await.unwrap();
    let ids: Vec<&str> = catalog[0].items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["i1"]);
}

#[tokio::test]
async fn pull_while_signed_out_returns_local_snapshot() {
    let h = harness();
    seed_remote(&h);
    let local_catalog = vec![supplier("local", "Offline", vec![])];
    h.manager
        .save_local(&local_catalog, &MutationContext::Unknown)
        .unwrap();
    h.identity.set_signed_in(false);

    let catalog = h.manager.sync_from_cloud().await.unwrap();
    assert_eq!(catalog, local_catalog);
}

#[tokio::test]
async fn pull_failure_leaves_local_snapshot_untouched() {
    let h = harness();
    seed_remote(&h);
    let local_catalog = vec![supplier("local", "Keep", vec![])];
    h.manager
        .save_local(&local_catalog, &MutationContext::Unknown)
        .unwrap();

    h.api.fail_next("list", 1);
    assert!(h.manager.sync_from_cloud().await.is_err());

    assert_eq!(h.manager.load_local(), local_catalog);
    assert!(h.manager.status().has_pending_changes);
}

#[tokio::test]
async fn pull_of_empty_remote_yields_empty_catalog() {
    let h = harness();
    let catalog = h.manager.sync_from_cloud().await.unwrap();
    assert!(catalog.is_empty());
}

// ----------------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_sync_request_is_dropped_not_queued() {
    let h = harness();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    let gate = Arc::new(Semaphore::new(0));
    h.api.gate_lists(gate.clone());

    let manager = h.manager.clone();
    let in_flight = tokio::spawn(async move { manager.sync_to_cloud().await });

    // Wait until the flush is parked on its first list call.
    while !h.api.op_log().iter().any(|op| op == "list-waiting") {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(h.manager.status().syncing);

    let lists_so_far = h.api.call_count("list");
    let snapshot = h.manager.sync_from_cloud().await.unwrap();
    assert_eq!(snapshot, two_supplier_catalog(), "second caller gets the local snapshot");
    assert_eq!(h.api.call_count("list"), lists_so_far, "no extra network from the dropped request");

    gate.add_permits(1000);
    in_flight.await.unwrap().unwrap();
    assert!(!h.manager.status().syncing);
}

#[tokio::test]
async fn mutation_during_flight_keeps_pending_and_snapshot() {
    let h = harness();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    let gate = Arc::new(Semaphore::new(0));
    h.api.gate_lists(gate.clone());

    let manager = h.manager.clone();
    let in_flight = tokio::spawn(async move { manager.sync_to_cloud().await });
    while !h.api.op_log().iter().any(|op| op == "list-waiting") {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // A save lands mid-flight.
    let mut newer = two_supplier_catalog();
    newer[0].name = "Acme v2".to_string();
    h.manager
        .save_local(
            &newer,
            &MutationContext::HeaderChanged {
                supplier_id: "s1".to_string(),
            },
        )
        .unwrap();

    gate.add_permits(1000);
    in_flight.await.unwrap().unwrap();

    // The flag stays set for the next-generation dirt, and the mid-flight
    // save is not clobbered by the flushed copy.
    assert!(h.manager.status().has_pending_changes);
    assert_eq!(h.manager.load_local()[0].name, "Acme v2");
}

// ----------------------------------------------------------------------------
// Connectivity and identity transitions
// ----------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_triggers_automatic_flush() {
    let h = harness();
    h.manager.handle_offline();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();
    h.manager.sync_to_cloud().await.unwrap();
    assert!(h.api.op_log().is_empty());

    h.manager.handle_online().await;

    assert!(!h.manager.status().has_pending_changes);
    assert!(h
        .api
        .file_names()
        .contains(&"suppliers-index.json".to_string()));
}

#[tokio::test]
async fn sign_in_triggers_automatic_flush() {
    let h = harness();
    h.identity.set_signed_in(false);
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();
    h.manager.handle_auth_change(false).await;
    assert!(h.api.op_log().is_empty());

    h.identity.set_signed_in(true);
    h.manager.handle_auth_change(true).await;

    assert!(!h.manager.status().has_pending_changes);
}

#[tokio::test]
async fn reconnect_flush_failure_is_swallowed() {
    let h = harness();
    h.manager.handle_offline();
    h.manager
        .save_local(&two_supplier_catalog(), &MutationContext::Unknown)
        .unwrap();

    h.api.fail_next("create", 100);
    h.manager.handle_online().await;

    assert!(h.manager.status().is_online);
    assert!(h.manager.status().has_pending_changes);
}

// ----------------------------------------------------------------------------
// Index rebuild
// ----------------------------------------------------------------------------

#[tokio::test]
async fn rebuild_index_reconstructs_from_entity_records() {
    let h = harness();
    let root = h.api.seed_folder("Campionari");
    h.api.seed_file(
        &root,
        "supplier-s1-header.json",
        r#"{"id":"s1","name":"Acme","headerData":{"itemOrder":["i2","i1"]}}"#,
    );
    h.api.seed_file(
        &root,
        "supplier-s1-item-i1.json",
        r#"{"supplierId":"s1","id":"i1","itemCode":"X1"}"#,
    );
    h.api.seed_file(
        &root,
        "supplier-s1-item-i2.json",
        r#"{"supplierId":"s1","id":"i2","itemCode":"X2"}"#,
    );
    // An orphaned item whose header record is gone.
    h.api.seed_file(
        &root,
        "supplier-s9-item-z1.json",
        r#"{"supplierId":"s9","id":"z1","itemCode":"Z1"}"#,
    );

    let index = h.manager.rebuild_index().await.unwrap();

    let s1 = index.suppliers.iter().find(|s| s.id == "s1").unwrap();
    assert_eq!(s1.name, "Acme");
    let ids: Vec<&str> = s1.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["i2", "i1"], "rebuild honors the persisted item order");

    let s9 = index.suppliers.iter().find(|s| s.id == "s9").unwrap();
    assert_eq!(s9.items.len(), 1, "orphaned items are still indexed");

    // The rebuilt index is persisted.
    assert!(h
        .api
        .content_of("suppliers-index.json")
        .unwrap()
        .contains("\"s9\""));
}
