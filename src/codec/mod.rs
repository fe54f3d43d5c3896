//! Entity codec: (de)serialization of the three persisted record kinds —
//! index, header, item — plus the deterministic blob-naming convention and
//! item-order reconstruction.
//!
//! Decoding is defensive throughout: schema evolution is additive-only, so
//! any field absent in an older record resolves to its empty default.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::{HeaderData, Item, Supplier, SupplierIndex, SupplierIndexEntry, ItemIndexEntry};

// ============================================================================
// Blob naming
// ============================================================================

pub const INDEX_BLOB_NAME: &str = "suppliers-index.json";

/// The pre-migration monolithic record holding the whole catalog.
pub const LEGACY_BLOB_NAME: &str = "suppliers.json";

pub fn header_blob_name(supplier_id: &str) -> String {
    format!("supplier-{supplier_id}-header.json")
}

pub fn item_blob_name(supplier_id: &str, item_id: &str) -> String {
    format!("supplier-{supplier_id}-item-{item_id}.json")
}

/// Prefix matching every record belonging to one supplier.
pub fn supplier_blob_prefix(supplier_id: &str) -> String {
    format!("supplier-{supplier_id}-")
}

/// Prefix matching every per-entity record in the store.
pub const ENTITY_BLOB_PREFIX: &str = "supplier-";

/// Image blob name: owner, kind tag, uniqueness token, original file name.
pub fn image_blob_name(supplier_id: &str, kind: &str, token: i64, original_name: &str) -> String {
    format!("{supplier_id}_{kind}_{token}_{original_name}")
}

// ============================================================================
// Record shapes
// ============================================================================

/// Per-supplier header record (`supplier-{id}-header.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaderRecord {
    pub id: String,
    pub name: String,
    pub header_data: HeaderData,
}

/// Per-item record (`supplier-{id}-item-{itemId}.json`). Carries a
/// denormalized `supplierId` for provenance; it is not part of the in-memory
/// `Item` and is stripped back out on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemRecord {
    pub supplier_id: String,
    #[serde(flatten)]
    pub item: Item,
}

// ============================================================================
// Encode / decode
// ============================================================================

/// Encode a supplier's header record with a fresh item-order snapshot.
pub fn encode_header(supplier: &Supplier, item_order: Vec<String>) -> Result<String, CodecError> {
    let record = HeaderRecord {
        id: supplier.id.clone(),
        name: supplier.name.clone(),
        header_data: HeaderData {
            item_order: Some(item_order),
            ..supplier.header_data.clone()
        },
    };
    serde_json::to_string_pretty(&record).map_err(|source| CodecError::Encode {
        record: "header",
        source,
    })
}

pub fn decode_header(raw: &str) -> Result<HeaderRecord, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError::Decode {
        record: "header",
        source,
    })
}

pub fn encode_item(supplier_id: &str, item: &Item) -> Result<String, CodecError> {
    let record = ItemRecord {
        supplier_id: supplier_id.to_string(),
        item: item.clone(),
    };
    serde_json::to_string_pretty(&record).map_err(|source| CodecError::Encode {
        record: "item",
        source,
    })
}

pub fn decode_item(raw: &str) -> Result<ItemRecord, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError::Decode {
        record: "item",
        source,
    })
}

pub fn encode_index(index: &SupplierIndex) -> Result<String, CodecError> {
    serde_json::to_string_pretty(index).map_err(|source| CodecError::Encode {
        record: "index",
        source,
    })
}

pub fn decode_index(raw: &str) -> Result<SupplierIndex, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError::Decode {
        record: "index",
        source,
    })
}

/// Encode the legacy monolithic catalog record (`suppliers.json`).
pub fn encode_legacy_catalog(catalog: &[Supplier]) -> Result<String, CodecError> {
    serde_json::to_string_pretty(catalog).map_err(|source| CodecError::Encode {
        record: "legacy catalog",
        source,
    })
}

pub fn decode_legacy_catalog(raw: &str) -> Result<Vec<Supplier>, CodecError> {
    serde_json::from_str(raw).map_err(|source| CodecError::Decode {
        record: "legacy catalog",
        source,
    })
}

// ============================================================================
// Item order
// ============================================================================

/// Reorder `items` per the header's persisted item-order snapshot.
///
/// Ids listed in `order` come first, in that order. Items the snapshot does
/// not know about (created after it was taken) are appended in encountered
/// order. Ids in the snapshot with no matching item are ignored.
pub fn apply_item_order(items: Vec<Item>, order: Option<&[String]>) -> Vec<Item> {
    let Some(order) = order else {
        return items;
    };

    let mut remaining: Vec<Option<Item>> = items.into_iter().map(Some).collect();
    let mut sorted = Vec::with_capacity(remaining.len());

    for id in order {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|item| &item.id == id))
        {
            sorted.extend(slot.take());
        }
    }
    sorted.extend(remaining.into_iter().flatten());
    sorted
}

/// Build an index record from a catalog with every entity stamped `now`.
///
/// Used by layout migration and index rebuild, where no previous index is
/// available to carry timestamps forward from.
pub fn index_from_catalog(catalog: &[Supplier], now: &str) -> SupplierIndex {
    SupplierIndex {
        suppliers: catalog
            .iter()
            .map(|supplier| SupplierIndexEntry {
                id: supplier.id.clone(),
                name: supplier.name.clone(),
                header_last_modified: now.to_string(),
                items: supplier
                    .items
                    .iter()
                    .map(|item| ItemIndexEntry {
                        id: item.id.clone(),
                        item_code: item.item_code.clone(),
                        last_modified: now.to_string(),
                    })
                    .collect(),
            })
            .collect(),
        last_updated: now.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
