pub mod manager;
pub mod migrate;
pub mod status;

pub use manager::SyncManager;
pub use migrate::{migrate_layout, StorageLayout};
pub use status::{ListenerId, StatusCell};

use chrono::{SecondsFormat, Utc};

/// Current UTC time in the RFC 3339 millisecond format used by every
/// persisted timestamp (`lastSync`, `lastModified`, `lastUpdated`).
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
