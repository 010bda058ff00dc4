//! Registry client: pulls OCI images into the [`Graph`](crate::graph::Graph)
//! layer-by-layer.
//!
//! The trait exists so the daemon can be wired against a fake client in
//! tests without touching the network.

mod client;

pub use client::OciRegistryClient;

use async_trait::async_trait;
use keel_shared::errors::EngineResult;
use serde::Serialize;

use crate::repository::ImageReference;

/// One step of pull/push progress, surfaced to API clients as an event
/// stream. Wire shape per spec: `{id, status, currentBytes, totalBytes}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub id: String,
    pub status: String,
    pub current_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressEvent {
    fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            current_bytes: 0,
            total_bytes: 0,
        }
    }
}

/// Outcome of a successful pull: the id of the image's top layer, ready to
/// be tagged in [`Repositories`](crate::repository::Repositories).
pub struct PulledImage {
    pub top_layer_id: String,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Pull every layer of `reference` into `graph`, reporting progress on
    /// `sink`. Returns the id of the topmost registered layer.
    async fn pull_image(
        &self,
        reference: &ImageReference,
        graph: &crate::graph::Graph,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<PulledImage>;

    /// Push the layer chain rooted at `top_layer_id` to `reference`'s
    /// registry. Kept as a trait method so a registry implementation that
    /// supports uploads can fill it in without changing callers.
    async fn push_image(
        &self,
        reference: &ImageReference,
        top_layer_id: &str,
        graph: &crate::graph::Graph,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<()>;
}
