use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError — remote blob store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store transport error during {op}: {message}")]
    Transport { op: &'static str, message: String },

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob {id} does not contain valid UTF-8 text")]
    NotText { id: String },
}

impl StoreError {
    pub fn transport(op: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            op,
            message: message.into(),
        }
    }

    /// Whether this error means "the record simply does not exist".
    ///
    /// Expected absences (first run, stale index entries) are treated as
    /// empty defaults by callers rather than failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// LocalStoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("local store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode {record} record")]
    Decode {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {record} record")]
    Encode {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Configuration failures are fatal at construction time — they are never
/// retried or downgraded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {setting}: {message}")]
    Invalid {
        setting: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// CatalogSyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogSyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Convenience alias — the default error type is `CatalogSyncError`.
pub type Result<T, E = CatalogSyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
