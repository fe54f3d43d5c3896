//! Image materializer: converts between the inline (data-URL) and remote
//! (blob reference) representations of catalog images.
//!
//! Both representations may coexist on one image — once a blob reference
//! exists the inline payload is retained, never discarded. Upload failures
//! soft-degrade: the caller keeps the inline-only image and the enclosing
//! save is never aborted.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::storage::BlobStore;
use crate::types::ImageFile;

// ============================================================================
// FetchStrategy / ImageKind
// ============================================================================

/// How `resolve` turns a blob reference into displayable content.
///
/// `InlineData` fetches the bytes and re-encodes them as a data URL (one
/// request paid here, plus encode CPU). `DirectLink` substitutes the blob's
/// public download URL, deferring the request to the display surface.
/// Either strategy produces the same `ImageFile` shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchStrategy {
    #[default]
    InlineData,
    DirectLink,
}

/// Which slot of the catalog an image occupies; becomes the kind tag in the
/// blob name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    BusinessCard,
    Item,
}

impl ImageKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::BusinessCard => "business-card",
            Self::Item => "item",
        }
    }
}

// ============================================================================
// Data URL helpers
// ============================================================================

/// Decode the payload of a `data:{mime};base64,{payload}` URL.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, String> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| "not a data URL: missing payload separator".to_string())?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(format!("unsupported data URL header: {header}"));
    }
    BASE64
        .decode(payload)
        .map_err(|e| format!("invalid base64 payload: {e}"))
}

pub fn encode_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", BASE64.encode(bytes))
}

// ============================================================================
// ImageMaterializer
// ============================================================================

pub struct ImageMaterializer {
    blobs: Arc<BlobStore>,
    strategy: FetchStrategy,
}

impl ImageMaterializer {
    pub fn new(blobs: Arc<BlobStore>, strategy: FetchStrategy) -> Self {
        Self { blobs, strategy }
    }

    /// Upload an inline-only image as a remote blob.
    ///
    /// No-op when a blob reference already exists or there is no inline
    /// payload. A byte-identical blob uploaded earlier for the same owner
    /// and file name is reused rather than duplicated. On upload failure,
    /// retries exactly once; a second failure returns the image unchanged
    /// (soft degradation — the inline payload still renders offline and the
    /// save continues).
    pub async fn store(&self, image: &ImageFile, owner_id: &str, kind: ImageKind) -> ImageFile {
        if image.blob_id.is_some() {
            return image.clone();
        }
        let Some(data_url) = &image.data_url else {
            return image.clone();
        };

        let bytes = match decode_data_url(data_url) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(image = %image.name, error = %e, "inline payload undecodable, keeping as-is");
                return image.clone();
            }
        };

        // An earlier flush may have uploaded this exact payload without its
        // reference ever reaching the snapshot (a save landed mid-flight).
        // Reuse a byte-identical blob instead of uploading a duplicate.
        if let Some(existing) = self.find_existing(owner_id, kind, &image.name, &bytes).await {
            if self.strategy == FetchStrategy::DirectLink {
                self.blobs.make_public(&existing).await;
            }
            let mut stored = image.clone();
            stored.blob_id = Some(existing);
            return stored;
        }

        let name = codec::image_blob_name(
            owner_id,
            kind.tag(),
            Utc::now().timestamp_millis(),
            &image.name,
        );

        let blob = match self
            .blobs
            .create_binary(&name, &image.content_type, bytes.clone())
            .await
        {
            Ok(blob) => blob,
            Err(first) => {
                tracing::warn!(image = %image.name, error = %first, "image upload failed, retrying once");
                match self
                    .blobs
                    .create_binary(&name, &image.content_type, bytes)
                    .await
                {
                    Ok(blob) => blob,
                    Err(second) => {
                        tracing::warn!(image = %image.name, error = %second, "image upload retry failed, keeping inline payload");
                        return image.clone();
                    }
                }
            }
        };

        if self.strategy == FetchStrategy::DirectLink {
            self.blobs.make_public(&blob.id).await;
        }

        let mut stored = image.clone();
        stored.blob_id = Some(blob.id);
        stored
    }

    /// Find an already-uploaded blob for the same owner, kind, and file name
    /// whose content matches `bytes`. Lookup failures mean "no match".
    async fn find_existing(
        &self,
        owner_id: &str,
        kind: ImageKind,
        file_name: &str,
        bytes: &[u8],
    ) -> Option<String> {
        let prefix = format!("{owner_id}_{}_", kind.tag());
        let suffix = format!("_{file_name}");
        let candidates = self.blobs.find_by_prefix(&prefix).await.ok()?;
        for candidate in candidates.iter().filter(|b| b.name.ends_with(&suffix)) {
            if let Ok(content) = self.blobs.get_binary(&candidate.id).await {
                if content == bytes {
                    return Some(candidate.id.clone());
                }
            }
        }
        None
    }

    /// Materialize an image into displayable content.
    ///
    /// Inline content always wins with zero network cost. Otherwise the blob
    /// reference is resolved once per session; a fetch failure yields an
    /// image with no inline content and `load_error` set — the caller renders
    /// a placeholder, never an error.
    pub async fn resolve(&self, image: &ImageFile) -> ImageFile {
        if image.data_url.is_some() {
            return image.clone();
        }
        let Some(blob_id) = image.blob_id.clone() else {
            return image.clone();
        };
        if image.is_loaded {
            return image.clone();
        }

        let mut resolved = image.clone();
        match self.strategy {
            FetchStrategy::DirectLink => {
                resolved.data_url = Some(self.blobs.public_url(&blob_id));
                resolved.is_loaded = true;
            }
            FetchStrategy::InlineData => match self.blobs.get_binary(&blob_id).await {
                Ok(bytes) => {
                    resolved.data_url = Some(encode_data_url(&image.content_type, &bytes));
                    resolved.is_loaded = true;
                }
                Err(e) => {
                    tracing::warn!(image = %image.name, blob_id = %blob_id, error = %e, "image fetch failed");
                    resolved.load_error = Some(e.to_string());
                }
            },
        }
        resolved
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
