//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::image::FetchStrategy;
use crate::storage::RootScope;

/// Deployment-time configuration for the sync engine.
///
/// Validated once at construction; a failure here is fatal (`ConfigError`),
/// never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Name of the application folder created under the user's remote root.
    /// Ignored when `shared_root_id` is set.
    pub app_folder_name: String,

    /// Pre-provisioned shared root container. When set, records are written
    /// directly into it instead of a named subfolder (the shared-root
    /// deployment mode).
    pub shared_root_id: Option<String>,

    /// Namespace prefix for local store keys.
    pub key_prefix: String,

    /// How image blob references are resolved for display.
    pub fetch_strategy: FetchStrategy,

    /// Initial connectivity assumption. Hosts that can observe the real
    /// network state should call `handle_online`/`handle_offline` at startup.
    pub assume_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_folder_name: "Campionari".to_string(),
            shared_root_id: None,
            key_prefix: "campionari".to_string(),
            fetch_strategy: FetchStrategy::default(),
            assume_online: true,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Missing("keyPrefix"));
        }
        match &self.shared_root_id {
            Some(id) if id.is_empty() => Err(ConfigError::Invalid {
                setting: "sharedRootId",
                message: "must not be empty when set".to_string(),
            }),
            Some(_) => Ok(()),
            None if self.app_folder_name.is_empty() => Err(ConfigError::Missing("appFolderName")),
            None => Ok(()),
        }
    }

    pub fn root_scope(&self) -> RootScope {
        match &self.shared_root_id {
            Some(id) => RootScope::Shared(id.clone()),
            None => RootScope::AppFolder(self.app_folder_name.clone()),
        }
    }
}
