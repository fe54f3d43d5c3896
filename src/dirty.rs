//! Dirty tracker: the persisted record of which headers, items, and whole
//! suppliers have been mutated or deleted since the last successful flush.
//!
//! Every mark is written through to the local store immediately — dirty
//! state must survive a process restart and must never be lost before the
//! next sync attempt. `drain` performs the atomic swap that gives in-flight
//! flushes generation isolation: mutations arriving during a flush
//! accumulate into a fresh generation instead of being merged into (or
//! dropped by) the one on the wire.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LocalStoreError;
use crate::storage::local::{read_json_or_default, LocalStore, StoreKeys};
use crate::types::Supplier;

// ============================================================================
// DirtyGeneration
// ============================================================================

/// One generation of accumulated dirt, as returned by [`DirtyTracker::drain`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirtyGeneration {
    pub headers: BTreeSet<String>,
    pub items: BTreeMap<String, BTreeSet<String>>,
    pub deleted_suppliers: BTreeSet<String>,
    pub deleted_items: BTreeMap<String, BTreeSet<String>>,
}

impl DirtyGeneration {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
            && self.items.values().all(BTreeSet::is_empty)
            && self.deleted_suppliers.is_empty()
            && self.deleted_items.values().all(BTreeSet::is_empty)
    }

    /// Set-union merge of `other` into `self`.
    fn merge(&mut self, other: DirtyGeneration) {
        self.headers.extend(other.headers);
        for (supplier, items) in other.items {
            self.items.entry(supplier).or_default().extend(items);
        }
        self.deleted_suppliers.extend(other.deleted_suppliers);
        for (supplier, items) in other.deleted_items {
            self.deleted_items.entry(supplier).or_default().extend(items);
        }
    }
}

// ============================================================================
// DirtyTracker
// ============================================================================

pub struct DirtyTracker {
    local: Arc<dyn LocalStore>,
    keys: StoreKeys,
    state: Mutex<DirtyGeneration>,
    /// Count of generations drained this session, for diagnostics.
    drained: AtomicU64,
}

impl DirtyTracker {
    /// Load persisted dirty state. Missing or corrupt values decode to empty
    /// sets — a fresh install and a wiped store look identical.
    pub fn new(local: Arc<dyn LocalStore>, keys: StoreKeys) -> Self {
        let state = DirtyGeneration {
            headers: read_json_or_default(local.as_ref(), &keys.dirty_headers()),
            items: read_json_or_default(local.as_ref(), &keys.dirty_items()),
            deleted_suppliers: read_json_or_default(local.as_ref(), &keys.deleted_suppliers()),
            deleted_items: read_json_or_default(local.as_ref(), &keys.deleted_items()),
        };
        Self {
            local,
            keys,
            state: Mutex::new(state),
            drained: AtomicU64::new(0),
        }
    }

    fn persist(&self, state: &DirtyGeneration) -> Result<(), LocalStoreError> {
        self.local
            .set(&self.keys.dirty_headers(), &serde_json::to_string(&state.headers)?)?;
        self.local
            .set(&self.keys.dirty_items(), &serde_json::to_string(&state.items)?)?;
        self.local.set(
            &self.keys.deleted_suppliers(),
            &serde_json::to_string(&state.deleted_suppliers)?,
        )?;
        self.local.set(
            &self.keys.deleted_items(),
            &serde_json::to_string(&state.deleted_items)?,
        )?;
        Ok(())
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut DirtyGeneration),
    ) -> Result<(), LocalStoreError> {
        let mut state = self.state.lock();
        f(&mut state);
        self.persist(&state)
    }

    pub fn mark_header_dirty(&self, supplier_id: &str) -> Result<(), LocalStoreError> {
        self.mutate(|s| {
            s.headers.insert(supplier_id.to_string());
        })
    }

    pub fn mark_item_dirty(&self, supplier_id: &str, item_id: &str) -> Result<(), LocalStoreError> {
        self.mutate(|s| {
            s.items
                .entry(supplier_id.to_string())
                .or_default()
                .insert(item_id.to_string());
        })
    }

    /// Record a supplier deletion intent. Any pending dirty marks for the
    /// supplier are dropped — its records are about to disappear wholesale.
    pub fn mark_supplier_deleted(&self, supplier_id: &str) -> Result<(), LocalStoreError> {
        self.mutate(|s| {
            s.headers.remove(supplier_id);
            s.items.remove(supplier_id);
            s.deleted_items.remove(supplier_id);
            s.deleted_suppliers.insert(supplier_id.to_string());
        })
    }

    pub fn mark_item_deleted(&self, supplier_id: &str, item_id: &str) -> Result<(), LocalStoreError> {
        self.mutate(|s| {
            if let Some(items) = s.items.get_mut(supplier_id) {
                items.remove(item_id);
            }
            s.deleted_items
                .entry(supplier_id.to_string())
                .or_default()
                .insert(item_id.to_string());
        })
    }

    /// Conservative fallback: mark every header and item in the catalog dirty.
    pub fn mark_all_dirty(&self, catalog: &[Supplier]) -> Result<(), LocalStoreError> {
        self.mutate(|s| {
            for supplier in catalog {
                s.headers.insert(supplier.id.clone());
                let items = s.items.entry(supplier.id.clone()).or_default();
                for item in &supplier.items {
                    items.insert(item.id.clone());
                }
            }
        })
    }

    /// Atomically take the current generation and reset to empty.
    ///
    /// The empty state is persisted before the generation is returned, so a
    /// crash mid-flush can at worst lose the in-flight generation (the
    /// accepted risk window) — never double-send it.
    pub fn drain(&self) -> Result<DirtyGeneration, LocalStoreError> {
        let mut state = self.state.lock();
        let taken = std::mem::take(&mut *state);
        self.persist(&state)?;
        self.drained.fetch_add(1, Ordering::Relaxed);
        Ok(taken)
    }

    /// Number of generations drained this session.
    pub fn generation(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }

    /// Merge a previously drained generation back in (set union with any dirt
    /// accumulated since). Used when a flush fails so its entities are
    /// re-sent by the next attempt.
    pub fn restore(&self, generation: DirtyGeneration) -> Result<(), LocalStoreError> {
        self.mutate(|s| s.merge(generation))
    }

    /// Discard all dirty state (after an authoritative pull).
    pub fn clear(&self) -> Result<(), LocalStoreError> {
        let mut state = self.state.lock();
        *state = DirtyGeneration::default();
        self.persist(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn snapshot(&self) -> DirtyGeneration {
        self.state.lock().clone()
    }
}
