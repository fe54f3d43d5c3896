//! Catalog domain model and shared sync types.
//!
//! Wire names are camelCase to match the persisted record format. Every
//! persisted struct carries container-level `#[serde(default)]` so records
//! written by older versions decode to field-appropriate defaults
//! (additive-only schema evolution).

use serde::{Deserialize, Serialize};

/// Generate a fresh opaque entity id.
///
/// Ids are client-generated and immutable for the entity's lifetime; the
/// engine never interprets their contents.
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// ImageFile
// ============================================================================

/// A catalog image in one (or both) of two representations.
///
/// - `data_url`: inline base64 payload (`data:{mime};base64,...`) — the
///   legacy/fallback form, always displayable without network access.
/// - `blob_id`: opaque remote blob reference — the optimized form, resolved
///   on demand by the image materializer.
///
/// Once a blob reference exists the inline payload is deliberately retained,
/// trading storage size for resilience against partial upload failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,

    pub name: String,

    #[serde(rename = "type")]
    pub content_type: String,

    /// Fetched from the remote store this session. Never persisted.
    #[serde(skip)]
    pub is_loaded: bool,

    /// Set when a remote fetch failed; callers render a placeholder.
    /// Never persisted.
    #[serde(skip)]
    pub load_error: Option<String>,
}

impl ImageFile {
    /// Build an inline-only image from raw bytes.
    pub fn inline(name: impl Into<String>, content_type: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            data_url: Some(data_url.into()),
            name: name.into(),
            content_type: content_type.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Item
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    pub id: String,
    pub item_code: String,
    pub description: String,
    pub moq: String,
    pub delivery: String,
    pub price: String,
    pub composition: String,
    pub notes: String,
    pub images: Vec<ImageFile>,
}

impl Item {
    /// Create an empty item with a fresh id, ready to be appended to a
    /// supplier's item sequence.
    pub fn new() -> Self {
        Self {
            id: new_entity_id(),
            ..Self::default()
        }
    }
}

// ============================================================================
// HeaderData
// ============================================================================

/// Supplier origin classification. Serialized as the original wire strings;
/// unknown values decode to `Unset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactoryType {
    #[serde(rename = "TRADING")]
    Trading,
    #[serde(rename = "FACTORY")]
    Factory,
    #[default]
    #[serde(rename = "", other)]
    Unset,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaderData {
    pub business_card: Option<ImageFile>,
    pub date: String,
    pub booth: String,
    pub made_in: String,
    pub num_samples: String,
    pub samples_arriving_date: String,
    pub notes: String,
    pub factory_type: FactoryType,

    /// Item-id sequence used to reconstruct display order when items are
    /// stored as independent records. Permutation-superset invariant: ids it
    /// lists come first in that order, unlisted items are appended in
    /// encountered order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_order: Option<Vec<String>>,
}

// ============================================================================
// Supplier
// ============================================================================

/// Root aggregate of the local catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub header_data: HeaderData,
    pub items: Vec<Item>,
}

// ============================================================================
// SupplierIndex — remote-only manifest
// ============================================================================

/// Catalog-of-catalogs stored as `suppliers-index.json`. Lets the loader
/// enumerate what exists without fetching every record. Purely a cache —
/// rebuildable from the per-entity records (see `SyncManager::rebuild_index`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupplierIndex {
    pub suppliers: Vec<SupplierIndexEntry>,
    pub last_updated: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupplierIndexEntry {
    pub id: String,
    pub name: String,
    pub header_last_modified: String,
    pub items: Vec<ItemIndexEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemIndexEntry {
    pub id: String,
    pub item_code: String,
    pub last_modified: String,
}

// ============================================================================
// MutationContext
// ============================================================================

/// What a local save changed. Drives granular dirty-marking; `Unknown` is the
/// conservative fallback that marks the whole catalog dirty.
///
/// Structural item changes (`ItemAdded`, `ItemRemoved`, `ItemsReordered`)
/// also mark the owning header dirty, because item order is stored only on
/// the header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationContext {
    HeaderChanged { supplier_id: String },
    ItemChanged { supplier_id: String, item_id: String },
    ItemAdded { supplier_id: String, item_id: String },
    ItemRemoved { supplier_id: String, item_id: String },
    ItemsReordered { supplier_id: String },
    SupplierAdded { supplier_id: String },
    SupplierRemoved { supplier_id: String },
    Unknown,
}

// ============================================================================
// SyncStatus
// ============================================================================

/// Observable orchestrator state, pushed to every subscriber on change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync: Option<String>,
    pub has_pending_changes: bool,
    pub syncing: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
