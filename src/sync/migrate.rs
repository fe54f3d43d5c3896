//! One-way storage layout migration: monolithic catalog record →
//! granular per-entity records.
//!
//! Earlier deployments stored the whole catalog as one `suppliers.json`
//! blob. Migration explodes it into per-supplier header and item records
//! plus the index, then marks the layout locally so it never runs twice.
//! The legacy blob is left in place as a manual recovery artifact.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::SyncError;
use crate::storage::local::read_json_or_default;
use crate::storage::{BlobStore, LocalStore, StoreKeys};
use crate::sync::now_rfc3339;

/// Persisted layout marker. Defaults to `Monolithic`, so a fresh install
/// takes one cheap migration pass (no legacy blob found) and self-marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageLayout {
    #[default]
    Monolithic,
    Granular,
}

/// Migrate the remote store to the granular layout if it has not been
/// migrated yet. Returns `true` when a legacy catalog was actually exploded,
/// `false` when there was nothing to do.
///
/// A corrupt legacy blob aborts with an error and leaves the layout marker
/// unchanged, so the migration is retried after the blob is repaired.
pub async fn migrate_layout(
    blobs: &BlobStore,
    local: &dyn LocalStore,
    keys: &StoreKeys,
) -> Result<bool, SyncError> {
    let layout: StorageLayout = read_json_or_default(local, &keys.storage_layout());
    if layout == StorageLayout::Granular {
        return Ok(false);
    }

    let legacy = blobs.find_by_name(codec::LEGACY_BLOB_NAME).await?;
    let Some(legacy) = legacy else {
        mark_granular(local, keys)?;
        return Ok(false);
    };

    let raw = blobs.get_content(&legacy.id).await?;
    let catalog = codec::decode_legacy_catalog(&raw)?;
    tracing::info!(suppliers = catalog.len(), "migrating legacy catalog to granular records");

    for supplier in &catalog {
        let order: Vec<String> = supplier.items.iter().map(|i| i.id.clone()).collect();
        let header = codec::encode_header(supplier, order)?;
        blobs
            .put_json(&codec::header_blob_name(&supplier.id), &header)
            .await?;
        for item in &supplier.items {
            let content = codec::encode_item(&supplier.id, item)?;
            blobs
                .put_json(&codec::item_blob_name(&supplier.id, &item.id), &content)
                .await?;
        }
    }

    let index = codec::index_from_catalog(&catalog, &now_rfc3339());
    blobs
        .put_json(codec::INDEX_BLOB_NAME, &codec::encode_index(&index)?)
        .await?;

    mark_granular(local, keys)?;
    Ok(true)
}

fn mark_granular(local: &dyn LocalStore, keys: &StoreKeys) -> Result<(), SyncError> {
    let value = serde_json::to_string(&StorageLayout::Granular)
        .map_err(crate::error::LocalStoreError::from)?;
    local.set(&keys.storage_layout(), &value)?;
    Ok(())
}
