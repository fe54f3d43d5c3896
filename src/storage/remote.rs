//! Remote blob store adapter.
//!
//! `FileApi` is the narrow raw-I/O trait implemented by the host over the
//! real cloud file API (and by in-memory fakes in tests). `BlobStore` layers
//! the engine's conventions on top: every operation is scoped under one
//! lazily-resolved root container, zero query matches are "not found" rather
//! than errors, and permission grants are best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::StoreError;

// ============================================================================
// FileApi — host-provided raw file primitives
// ============================================================================

/// Reference to a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    /// Store-assigned opaque identifier.
    pub id: String,
    pub name: String,
}

/// File lookup within one parent container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileQuery {
    ExactName(String),
    NamePrefix(String),
}

#[async_trait]
pub trait FileApi: Send + Sync {
    /// Find a top-level folder by name. `None` when absent.
    async fn find_folder(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Create a top-level folder and return its id.
    async fn create_folder(&self, name: &str) -> Result<String, StoreError>;

    /// List files under `parent` matching `query`. An empty result is normal.
    async fn list(&self, parent: &str, query: &FileQuery) -> Result<Vec<BlobRef>, StoreError>;

    /// Create a file under `parent` with the given content type and bytes.
    async fn create(
        &self,
        parent: &str,
        name: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<BlobRef, StoreError>;

    /// Replace the content of an existing file.
    async fn update(&self, id: &str, content: Vec<u8>) -> Result<(), StoreError>;

    /// Read a file's raw bytes. `StoreError::NotFound` when the id is gone.
    async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete a file. `StoreError::NotFound` when the id is already gone.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Grant public read access to a file.
    async fn make_public(&self, id: &str) -> Result<(), StoreError>;

    /// Directly constructible public download URL for a file id.
    fn public_url(&self, id: &str) -> String;
}

// ============================================================================
// RootScope
// ============================================================================

/// Where the engine's records live.
///
/// A deployment-time switch, not a runtime decision: either a named
/// application folder (found or created on first use) or a pre-provisioned
/// shared root used directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootScope {
    AppFolder(String),
    Shared(String),
}

// ============================================================================
// BlobStore
// ============================================================================

pub struct BlobStore {
    api: Arc<dyn FileApi>,
    scope: RootScope,
    root_id: OnceCell<String>,
}

impl BlobStore {
    pub fn new(api: Arc<dyn FileApi>, scope: RootScope) -> Self {
        Self {
            api,
            scope,
            root_id: OnceCell::new(),
        }
    }

    /// Resolve the root container id, creating the app folder on first use.
    async fn root(&self) -> Result<&str, StoreError> {
        let id = self
            .root_id
            .get_or_try_init(|| async {
                match &self.scope {
                    RootScope::Shared(id) => Ok(id.clone()),
                    RootScope::AppFolder(name) => match self.api.find_folder(name).await? {
                        Some(id) => Ok(id),
                        None => self.api.create_folder(name).await,
                    },
                }
            })
            .await?;
        Ok(id.as_str())
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<BlobRef>, StoreError> {
        let root = self.root().await?;
        let mut matches = self
            .api
            .list(root, &FileQuery::ExactName(name.to_string()))
            .await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<BlobRef>, StoreError> {
        let root = self.root().await?;
        self.api
            .list(root, &FileQuery::NamePrefix(prefix.to_string()))
            .await
    }

    pub async fn create_json(&self, name: &str, content: &str) -> Result<BlobRef, StoreError> {
        let root = self.root().await?;
        self.api
            .create(root, name, "application/json", content.as_bytes().to_vec())
            .await
    }

    pub async fn create_binary(
        &self,
        name: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<BlobRef, StoreError> {
        let root = self.root().await?;
        self.api.create(root, name, content_type, content).await
    }

    pub async fn update(&self, id: &str, content: &str) -> Result<(), StoreError> {
        self.api.update(id, content.as_bytes().to_vec()).await
    }

    /// Upsert a JSON record by name: update in place when it exists,
    /// create it otherwise.
    pub async fn put_json(&self, name: &str, content: &str) -> Result<BlobRef, StoreError> {
        match self.find_by_name(name).await? {
            Some(existing) => {
                self.update(&existing.id, content).await?;
                Ok(existing)
            }
            None => self.create_json(name, content).await,
        }
    }

    pub async fn get_content(&self, id: &str) -> Result<String, StoreError> {
        let bytes = self.api.read(id).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::NotText { id: id.to_string() })
    }

    pub async fn get_binary(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.api.read(id).await
    }

    /// Delete a blob. An already-missing blob is not an error — deletion
    /// intents may outlive the records they target.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match self.api.delete(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(id, "blob already gone, nothing to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Grant public read access, best-effort. A missing grant degrades image
    /// display but must never abort a save.
    pub async fn make_public(&self, id: &str) {
        if let Err(e) = self.api.make_public(id).await {
            tracing::warn!(id, error = %e, "public permission grant failed, continuing");
        }
    }

    pub fn public_url(&self, id: &str) -> String {
        self.api.public_url(id)
    }
}
