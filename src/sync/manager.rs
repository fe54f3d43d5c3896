//! Sync orchestrator — drives the save (local→cloud) and load (cloud→local)
//! protocols over the granular per-entity record layout.
//!
//! Local saves are synchronous and never touch the network; flushes move
//! only the records the dirty tracker names. A single `syncing` flag acts as
//! a mutex with no queueing: a second caller's request is dropped, not
//! deferred. Dirty state is drained before any I/O and restored (set union)
//! if the flush fails, so entities that were dirty before a failed
//! generation are re-sent by the next attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::auth::IdentityProvider;
use crate::codec::{self, HeaderRecord};
use crate::config::SyncConfig;
use crate::dirty::{DirtyGeneration, DirtyTracker};
use crate::error::{Result, SyncError};
use crate::image::{ImageKind, ImageMaterializer};
use crate::storage::local::read_json_or_default;
use crate::storage::{BlobStore, FileApi, LocalStore, StoreKeys};
use crate::sync::status::{ListenerId, StatusCell};
use crate::sync::{migrate, now_rfc3339};
use crate::types::{
    Item, ItemIndexEntry, MutationContext, Supplier, SupplierIndex, SupplierIndexEntry, SyncStatus,
};

// ============================================================================
// SyncManager
// ============================================================================

pub struct SyncManager {
    identity: Arc<dyn IdentityProvider>,
    blobs: Arc<BlobStore>,
    local: Arc<dyn LocalStore>,
    keys: StoreKeys,
    dirty: DirtyTracker,
    images: ImageMaterializer,
    status: StatusCell,
    /// Single-flight guard; mirrored into `status.syncing` for observers.
    syncing: AtomicBool,
}

impl SyncManager {
    /// Construct the orchestrator from explicitly passed collaborators.
    ///
    /// Fails only on invalid configuration; persisted status (last sync,
    /// pending flag, dirty sets) is loaded defensively.
    pub fn new(
        config: SyncConfig,
        identity: Arc<dyn IdentityProvider>,
        api: Arc<dyn FileApi>,
        local: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = StoreKeys::new(&config.key_prefix);
        let blobs = Arc::new(BlobStore::new(api, config.root_scope()));
        let images = ImageMaterializer::new(blobs.clone(), config.fetch_strategy);
        let dirty = DirtyTracker::new(local.clone(), keys.clone());

        let initial = SyncStatus {
            is_online: config.assume_online,
            last_sync: local.get(&keys.last_sync())?,
            has_pending_changes: local.get(&keys.pending_changes())?.as_deref() == Some("true"),
            syncing: false,
        };

        Ok(Self {
            identity,
            blobs,
            local,
            keys,
            dirty,
            images,
            status: StatusCell::new(initial),
            syncing: AtomicBool::new(false),
        })
    }

    // -----------------------------------------------------------------------
    // Status observation
    // -----------------------------------------------------------------------

    pub fn status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Subscribe to status changes. The callback immediately receives the
    /// current status, then every subsequent change.
    pub fn subscribe(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) -> ListenerId {
        self.status.subscribe(callback)
    }

    /// Idempotent; safe to call multiple times with the same id.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.status.unsubscribe(id);
    }

    // -----------------------------------------------------------------------
    // Local persistence
    // -----------------------------------------------------------------------

    /// Persist the full catalog snapshot and record what changed.
    ///
    /// Synchronous, never touches the network. Snapshot write happens before
    /// the dirty marks (write-then-mark ordering): a crash in between leaves
    /// an up-to-date snapshot with stale dirt, which the conservative caller
    /// recovers from with `MutationContext::Unknown`.
    pub fn save_local(
        &self,
        catalog: &[Supplier],
        ctx: &MutationContext,
    ) -> Result<(), SyncError> {
        let json = serde_json::to_string(catalog).map_err(|source| {
            crate::error::CodecError::Encode {
                record: "catalog snapshot",
                source,
            }
        })?;
        self.local.set(&self.keys.suppliers(), &json)?;
        self.apply_mutation(catalog, ctx)?;
        self.local.set(&self.keys.pending_changes(), "true")?;
        self.status.update(|s| s.has_pending_changes = true);
        Ok(())
    }

    /// Read the catalog snapshot; corrupt or missing decodes to empty.
    pub fn load_local(&self) -> Vec<Supplier> {
        read_json_or_default(self.local.as_ref(), &self.keys.suppliers())
    }

    fn apply_mutation(
        &self,
        catalog: &[Supplier],
        ctx: &MutationContext,
    ) -> Result<(), SyncError> {
        use MutationContext::*;
        match ctx {
            HeaderChanged { supplier_id } => self.dirty.mark_header_dirty(supplier_id)?,
            ItemChanged {
                supplier_id,
                item_id,
            } => self.dirty.mark_item_dirty(supplier_id, item_id)?,
            // Structural changes also dirty the header: item order is
            // persisted only on the header record.
            ItemAdded {
                supplier_id,
                item_id,
            } => {
                self.dirty.mark_item_dirty(supplier_id, item_id)?;
                self.dirty.mark_header_dirty(supplier_id)?;
            }
            ItemRemoved {
                supplier_id,
                item_id,
            } => {
                self.dirty.mark_item_deleted(supplier_id, item_id)?;
                self.dirty.mark_header_dirty(supplier_id)?;
            }
            ItemsReordered { supplier_id } => self.dirty.mark_header_dirty(supplier_id)?,
            SupplierAdded { supplier_id } => {
                self.dirty.mark_header_dirty(supplier_id)?;
                if let Some(supplier) = catalog.iter().find(|s| &s.id == supplier_id) {
                    for item in &supplier.items {
                        self.dirty.mark_item_dirty(supplier_id, &item.id)?;
                    }
                }
            }
            SupplierRemoved { supplier_id } => self.dirty.mark_supplier_deleted(supplier_id)?,
            Unknown => self.dirty.mark_all_dirty(catalog)?,
        }
        Ok(())
    }

    fn has_pending_changes(&self) -> Result<bool, SyncError> {
        Ok(self.local.get(&self.keys.pending_changes())?.as_deref() == Some("true"))
    }

    // -----------------------------------------------------------------------
    // Save protocol (local → cloud)
    // -----------------------------------------------------------------------

    /// Flush dirty entities to the remote store.
    ///
    /// No-op when signed out, offline, or a flush is already in flight.
    /// With no pending changes, skips network I/O entirely. On failure the
    /// drained dirty generation is restored and the error propagates; local
    /// state is never corrupted or rolled back.
    pub async fn sync_to_cloud(&self) -> Result<(), SyncError> {
        if !self.identity.is_signed_in() || self.identity.bearer_token().is_none() {
            return Ok(());
        }
        if !self.status.get().is_online {
            return Ok(());
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already in flight, dropping request");
            return Ok(());
        }

        self.status.update(|s| s.syncing = true);
        let result = self.flush().await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                let now = now_rfc3339();
                // A mutation that landed while we were flushing belongs to
                // the next generation; only a clean tracker clears the flag.
                let still_pending = !self.dirty.is_empty();
                if !still_pending {
                    self.local.remove(&self.keys.pending_changes())?;
                }
                self.local.set(&self.keys.last_sync(), &now)?;
                self.status.update(|s| {
                    s.syncing = false;
                    s.has_pending_changes = still_pending;
                    s.last_sync = Some(now);
                });
                Ok(())
            }
            Err(e) => {
                self.status.update(|s| s.syncing = false);
                Err(e)
            }
        }
    }

    async fn flush(&self) -> Result<(), SyncError> {
        if !self.has_pending_changes()? {
            tracing::debug!("no pending changes, skipping network flush");
            return Ok(());
        }

        // Snapshot and drain before the first network call: anything marked
        // dirty from here on belongs to the next generation.
        let catalog = self.load_local();
        let generation = self.dirty.drain()?;

        let outcome = async {
            let previous_index = self.fetch_index().await?;
            self.flush_generation(catalog, &previous_index, &generation)
                .await
        }
        .await;

        match outcome {
            Ok(materialized) => {
                // Write blob references gained during upload back into the
                // snapshot — but only if nothing mutated it mid-flight, so a
                // newer user edit is never clobbered by our stale copy.
                if self.dirty.is_empty() {
                    let json = serde_json::to_string(&materialized).map_err(|source| {
                        crate::error::CodecError::Encode {
                            record: "catalog snapshot",
                            source,
                        }
                    })?;
                    self.local.set(&self.keys.suppliers(), &json)?;
                }
                Ok(())
            }
            Err(e) => {
                if let Err(restore_err) = self.dirty.restore(generation) {
                    tracing::warn!(error = %restore_err, "failed to restore dirty generation after flush failure");
                }
                Err(e)
            }
        }
    }

    /// Execute one drained generation in strict order: deletions, then
    /// header upserts, then item upserts, then the index rebuild.
    ///
    /// Deletions run first so a supplier deleted and recreated under the
    /// same id within one generation is not wiped by its own stale
    /// deletion intent.
    async fn flush_generation(
        &self,
        mut catalog: Vec<Supplier>,
        previous_index: &SupplierIndex,
        generation: &DirtyGeneration,
    ) -> Result<Vec<Supplier>, SyncError> {
        // (1) Deletions.
        for supplier_id in &generation.deleted_suppliers {
            for blob in self
                .blobs
                .find_by_prefix(&codec::supplier_blob_prefix(supplier_id))
                .await?
            {
                self.blobs.delete(&blob.id).await?;
            }
        }
        for (supplier_id, item_ids) in &generation.deleted_items {
            if generation.deleted_suppliers.contains(supplier_id) {
                continue; // already removed by the prefix sweep
            }
            for item_id in item_ids {
                if let Some(blob) = self
                    .blobs
                    .find_by_name(&codec::item_blob_name(supplier_id, item_id))
                    .await?
                {
                    self.blobs.delete(&blob.id).await?;
                }
            }
        }

        // (2) Dirty headers, with a fresh item-order snapshot.
        for supplier in catalog.iter_mut() {
            if !generation.headers.contains(&supplier.id) {
                continue;
            }
            if let Some(card) = supplier.header_data.business_card.take() {
                let stored = self
                    .images
                    .store(&card, &supplier.id, ImageKind::BusinessCard)
                    .await;
                supplier.header_data.business_card = Some(stored);
            }
            let order: Vec<String> = supplier.items.iter().map(|i| i.id.clone()).collect();
            let content = codec::encode_header(supplier, order)?;
            self.blobs
                .put_json(&codec::header_blob_name(&supplier.id), &content)
                .await?;
        }

        // (3) Dirty items.
        for supplier in catalog.iter_mut() {
            let Some(dirty_items) = generation.items.get(&supplier.id) else {
                continue;
            };
            let supplier_id = supplier.id.clone();
            for item in supplier.items.iter_mut() {
                if !dirty_items.contains(&item.id) {
                    continue;
                }
                let mut images = Vec::with_capacity(item.images.len());
                for image in &item.images {
                    images.push(self.images.store(image, &supplier_id, ImageKind::Item).await);
                }
                item.images = images;
                let content = codec::encode_item(&supplier_id, item)?;
                self.blobs
                    .put_json(&codec::item_blob_name(&supplier_id, &item.id), &content)
                    .await?;
            }
        }

        // (4) Index rebuild.
        let index = build_index(&catalog, previous_index, generation, &now_rfc3339());
        self.blobs
            .put_json(codec::INDEX_BLOB_NAME, &codec::encode_index(&index)?)
            .await?;

        Ok(catalog)
    }

    /// Fetch the current index. Missing is a first run (empty); a corrupt
    /// index is treated the same, since it is a rebuildable cache.
    async fn fetch_index(&self) -> Result<SupplierIndex, SyncError> {
        let Some(blob) = self.blobs.find_by_name(codec::INDEX_BLOB_NAME).await? else {
            return Ok(SupplierIndex::default());
        };
        let raw = self.blobs.get_content(&blob.id).await?;
        match codec::decode_index(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt supplier index, treating as empty");
                Ok(SupplierIndex::default())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Load protocol (cloud → local)
    // -----------------------------------------------------------------------

    /// Pull the full catalog from the remote store and overwrite local state
    /// wholesale (the cloud is authoritative on explicit pull).
    ///
    /// Signed out — or racing an in-flight flush — returns the local
    /// snapshot unchanged, without error. Transport failures propagate and
    /// leave the local snapshot untouched.
    pub async fn sync_from_cloud(&self) -> Result<Vec<Supplier>, SyncError> {
        if !self.identity.is_signed_in() {
            return Ok(self.load_local());
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already in flight, returning local snapshot");
            return Ok(self.load_local());
        }

        self.status.update(|s| s.syncing = true);
        let result = self.pull().await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(catalog) => {
                let json = serde_json::to_string(&catalog).map_err(|source| {
                    crate::error::CodecError::Encode {
                        record: "catalog snapshot",
                        source,
                    }
                })?;
                self.local.set(&self.keys.suppliers(), &json)?;
                self.dirty.clear()?;
                self.local.remove(&self.keys.pending_changes())?;
                let now = now_rfc3339();
                self.local.set(&self.keys.last_sync(), &now)?;
                self.status.update(|s| {
                    s.syncing = false;
                    s.has_pending_changes = false;
                    s.last_sync = Some(now);
                });
                Ok(catalog)
            }
            Err(e) => {
                self.status.update(|s| s.syncing = false);
                Err(e)
            }
        }
    }

    async fn pull(&self) -> Result<Vec<Supplier>, SyncError> {
        let index = self.fetch_index().await?;
        let mut catalog = Vec::with_capacity(index.suppliers.len());
        for entry in &index.suppliers {
            catalog.push(self.fetch_supplier(entry).await?);
        }
        Ok(catalog)
    }

    async fn fetch_supplier(&self, entry: &SupplierIndexEntry) -> Result<Supplier, SyncError> {
        let header = match self
            .blobs
            .find_by_name(&codec::header_blob_name(&entry.id))
            .await?
        {
            Some(blob) => {
                let raw = self.blobs.get_content(&blob.id).await?;
                codec::decode_header(&raw)?
            }
            None => {
                // Stale index entry; reconstruct what we can so indexed
                // items are not dropped.
                tracing::warn!(supplier = %entry.id, "header record missing, reconstructing from index");
                HeaderRecord {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    ..HeaderRecord::default()
                }
            }
        };

        let fetches = entry
            .items
            .iter()
            .map(|item| self.fetch_item(&entry.id, &item.id));
        let mut items = Vec::with_capacity(entry.items.len());
        for fetched in join_all(fetches).await {
            if let Some(item) = fetched? {
                items.push(item);
            }
        }

        let order = header.header_data.item_order.clone();
        let items = codec::apply_item_order(items, order.as_deref());

        Ok(Supplier {
            id: header.id,
            name: header.name,
            header_data: header.header_data,
            items,
        })
    }

    async fn fetch_item(&self, supplier_id: &str, item_id: &str) -> Result<Option<Item>, SyncError> {
        match self
            .blobs
            .find_by_name(&codec::item_blob_name(supplier_id, item_id))
            .await?
        {
            Some(blob) => {
                let raw = self.blobs.get_content(&blob.id).await?;
                Ok(Some(codec::decode_item(&raw)?.item))
            }
            None => {
                tracing::warn!(supplier = supplier_id, item = item_id, "indexed item record missing, skipping");
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Image materialization (display path)
    // -----------------------------------------------------------------------

    /// Resolve an image to displayable content (see [`ImageMaterializer::resolve`]).
    pub async fn resolve_image(&self, image: &crate::types::ImageFile) -> crate::types::ImageFile {
        self.images.resolve(image).await
    }

    // -----------------------------------------------------------------------
    // Recovery and migration
    // -----------------------------------------------------------------------

    /// Rebuild the index record from a full blob listing.
    ///
    /// Recovery path for an index lost or corrupted independently of the
    /// per-entity records. Timestamp history is not recoverable; every
    /// entity is stamped with the rebuild time.
    pub async fn rebuild_index(&self) -> Result<SupplierIndex, SyncError> {
        let blobs = self.blobs.find_by_prefix(codec::ENTITY_BLOB_PREFIX).await?;

        let mut headers: Vec<HeaderRecord> = Vec::new();
        let mut items_by_supplier: HashMap<String, Vec<Item>> = HashMap::new();

        for blob in &blobs {
            if blob.name.ends_with("-header.json") {
                let raw = self.blobs.get_content(&blob.id).await?;
                headers.push(codec::decode_header(&raw)?);
            } else if blob.name.contains("-item-") && blob.name.ends_with(".json") {
                let raw = self.blobs.get_content(&blob.id).await?;
                let record = codec::decode_item(&raw)?;
                items_by_supplier
                    .entry(record.supplier_id)
                    .or_default()
                    .push(record.item);
            }
        }

        let now = now_rfc3339();
        let mut entries = Vec::with_capacity(headers.len());
        for header in headers {
            let items = items_by_supplier.remove(&header.id).unwrap_or_default();
            let items = codec::apply_item_order(items, header.header_data.item_order.as_deref());
            entries.push(SupplierIndexEntry {
                id: header.id,
                name: header.name,
                header_last_modified: now.clone(),
                items: items
                    .iter()
                    .map(|item| ItemIndexEntry {
                        id: item.id.clone(),
                        item_code: item.item_code.clone(),
                        last_modified: now.clone(),
                    })
                    .collect(),
            });
        }
        // Item records whose header is gone still get indexed, so recovery
        // never silently drops data.
        for (supplier_id, items) in items_by_supplier {
            tracing::warn!(supplier = %supplier_id, "item records without header record, indexing bare");
            entries.push(SupplierIndexEntry {
                id: supplier_id,
                name: String::new(),
                header_last_modified: now.clone(),
                items: items
                    .iter()
                    .map(|item| ItemIndexEntry {
                        id: item.id.clone(),
                        item_code: item.item_code.clone(),
                        last_modified: now.clone(),
                    })
                    .collect(),
            });
        }

        let index = SupplierIndex {
            suppliers: entries,
            last_updated: now,
        };
        self.blobs
            .put_json(codec::INDEX_BLOB_NAME, &codec::encode_index(&index)?)
            .await?;
        Ok(index)
    }

    /// One-way storage layout migration (see [`migrate::migrate_layout`]).
    pub async fn migrate_layout(&self) -> Result<bool, SyncError> {
        migrate::migrate_layout(&self.blobs, self.local.as_ref(), &self.keys).await
    }

    // -----------------------------------------------------------------------
    // Network / identity transitions
    // -----------------------------------------------------------------------

    /// The host observed connectivity return. Flips the flag and, when
    /// signed in, attempts an automatic flush; its failure is logged, never
    /// propagated.
    pub async fn handle_online(&self) {
        self.status.update(|s| s.is_online = true);
        if self.identity.is_signed_in() {
            if let Err(e) = self.sync_to_cloud().await {
                tracing::warn!(error = %e, "automatic flush after reconnect failed");
            }
        }
    }

    /// Going offline only flips the status flag.
    pub fn handle_offline(&self) {
        self.status.update(|s| s.is_online = false);
    }

    /// The host observed a sign-in or sign-out. Signing in while online
    /// attempts an automatic flush of anything accumulated while signed out.
    pub async fn handle_auth_change(&self, signed_in: bool) {
        if signed_in {
            if self.status.get().is_online {
                if let Err(e) = self.sync_to_cloud().await {
                    tracing::warn!(error = %e, "automatic flush after sign-in failed");
                }
            }
        } else {
            tracing::debug!("signed out, sync disabled until next sign-in");
        }
    }
}

// ============================================================================
// Index building
// ============================================================================

/// Build the index for a flushed generation.
///
/// Entities dirty this generation are stamped `now`; untouched entities
/// carry their timestamp forward from the previous index so an untouched
/// entity's timestamp never regresses. Entities the previous index does not
/// know are stamped `now`.
fn build_index(
    catalog: &[Supplier],
    previous: &SupplierIndex,
    generation: &DirtyGeneration,
    now: &str,
) -> SupplierIndex {
    let previous_suppliers: HashMap<&str, &SupplierIndexEntry> = previous
        .suppliers
        .iter()
        .map(|e| (e.id.as_str(), e))
        .collect();

    let suppliers = catalog
        .iter()
        .map(|supplier| {
            let previous_entry = previous_suppliers.get(supplier.id.as_str());
            let header_last_modified = if generation.headers.contains(&supplier.id) {
                now.to_string()
            } else {
                previous_entry
                    .map(|e| e.header_last_modified.clone())
                    .filter(|ts| !ts.is_empty())
                    .unwrap_or_else(|| now.to_string())
            };

            let previous_items: HashMap<&str, &str> = previous_entry
                .map(|e| {
                    e.items
                        .iter()
                        .map(|i| (i.id.as_str(), i.last_modified.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            let dirty_items = generation.items.get(&supplier.id);

            let items = supplier
                .items
                .iter()
                .map(|item| {
                    let dirty = dirty_items.is_some_and(|set| set.contains(&item.id));
                    let last_modified = if dirty {
                        now.to_string()
                    } else {
                        previous_items
                            .get(item.id.as_str())
                            .filter(|ts| !ts.is_empty())
                            .map(|ts| ts.to_string())
                            .unwrap_or_else(|| now.to_string())
                    };
                    ItemIndexEntry {
                        id: item.id.clone(),
                        item_code: item.item_code.clone(),
                        last_modified,
                    }
                })
                .collect();

            SupplierIndexEntry {
                id: supplier.id.clone(),
                name: supplier.name.clone(),
                header_last_modified,
                items,
            }
        })
        .collect();

    SupplierIndex {
        suppliers,
        last_updated: now.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
