//! Offline-first sync engine for a supplier sample catalog.
//!
//! The catalog (suppliers, their header data, their items, their images)
//! lives locally as a single snapshot in a durable key→string store, and
//! remotely as granular per-entity JSON records under one root container in
//! a host-provided blob store. Local saves are synchronous and complete
//! without any network; a separate flush pushes only the entities a dirty
//! tracker recorded, and an explicit pull replaces local state from the
//! cloud wholesale.
//!
//! Integration points the host implements:
//! - [`storage::FileApi`] — raw file primitives over the real cloud store
//! - [`storage::LocalStore`] — durable key→string persistence
//! - [`auth::IdentityProvider`] — sign-in state and bearer tokens
//!
//! Everything else is wired up by [`sync::SyncManager::new`] from a
//! [`config::SyncConfig`].

pub mod auth;
pub mod codec;
pub mod config;
pub mod dirty;
pub mod error;
pub mod image;
pub mod storage;
pub mod sync;
pub mod types;

pub use auth::IdentityProvider;
pub use config::SyncConfig;
pub use error::{CatalogSyncError, Result, SyncError};
pub use image::{FetchStrategy, ImageMaterializer};
pub use storage::{BlobRef, BlobStore, FileApi, FileLocalStore, LocalStore, MemoryLocalStore};
pub use sync::{migrate_layout, StorageLayout, SyncManager};
pub use types::{
    HeaderData, ImageFile, Item, MutationContext, Supplier, SupplierIndex, SyncStatus,
};
