//! Observable status cell — typed pub/sub over [`SyncStatus`].
//!
//! Subscribing immediately delivers the current status, then every
//! subsequent change. All methods take `&self`; the listener lock is
//! released before any callback runs, so listeners may subscribe or
//! unsubscribe from inside a callback without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SyncStatus;

/// Handle returned by [`StatusCell::subscribe`]; pass to
/// [`StatusCell::unsubscribe`] to remove the listener.
pub type ListenerId = u64;

pub type StatusListener = dyn Fn(&SyncStatus) + Send + Sync;

pub struct StatusCell {
    status: Mutex<SyncStatus>,
    listeners: Mutex<Vec<(ListenerId, Arc<StatusListener>)>>,
    next_id: AtomicU64,
}

impl StatusCell {
    pub fn new(initial: SyncStatus) -> Self {
        Self {
            status: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn get(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    /// Apply `f` to the current status, then notify every listener with the
    /// updated snapshot.
    pub fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            f(&mut status);
            status.clone()
        };
        let listeners: Vec<Arc<StatusListener>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in listeners {
            cb(&snapshot);
        }
    }

    /// Register `callback` and immediately deliver the current status.
    pub fn subscribe(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback = Arc::new(callback);
        self.listeners.lock().push((id, callback.clone()));
        callback(&self.get());
        id
    }

    /// Remove the listener identified by `id`. Idempotent — unknown or
    /// already-removed ids are ignored.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
