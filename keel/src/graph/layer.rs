//! Layer identity and metadata (data model §3 "Layer").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 256-bit content hash, hex-encoded (64 chars), e.g. the SHA-256 of the
/// layer's canonicalized metadata + archive digest.
pub type LayerId = String;

/// Metadata persisted as `<root>/graph/<image-id>/json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayerMetadata {
    pub id: LayerId,
    /// Parent layer id; `None` for the root of a chain.
    pub parent: Option<LayerId>,
    pub author: Option<String>,
    /// Command that produced this layer (e.g. a Dockerfile instruction).
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Size of the extracted layer contents, in bytes.
    pub size: u64,
    /// Optional content checksum of the source archive (e.g. `sha256:...`).
    pub checksum: Option<String>,
}

impl LayerMetadata {
    pub fn new_root(id: LayerId, size: u64) -> Self {
        Self {
            id,
            parent: None,
            author: None,
            created_by: None,
            created_at: Utc::now(),
            size,
            checksum: None,
        }
    }

    pub fn with_parent(mut self, parent: LayerId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Compute a layer id from its parent id (if any) and the raw archive bytes.
///
/// This binds the id to both content and lineage, so two byte-identical
/// archives registered under different parents get different ids (the same
/// invariant OCI diff-ids rely on for `Register`'s dedup check).
pub fn compute_layer_id(parent: Option<&str>, archive: &[u8]) -> LayerId {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(archive);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_different_parent_yield_different_ids() {
        let a = compute_layer_id(Some("p1"), b"data");
        let b = compute_layer_id(Some("p2"), b"data");
        assert_ne!(a, b);
    }

    #[test]
    fn layer_id_is_64_hex_chars() {
        let id = compute_layer_id(None, b"data");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
