//! `oci-client`-backed [`RegistryClient`](super::RegistryClient).
//!
//! Pulls the manifest, resolves a platform-specific manifest out of an
//! index if needed, then pulls each layer blob and registers it into the
//! Graph as it lands — the Graph is already the content-addressed store,
//! so there's no separate blob cache to maintain.

use std::io::Seek;

use async_trait::async_trait;
use keel_shared::errors::{EngineError, EngineResult};
use oci_client::client::{Config, ImageLayer, ClientConfig, ClientProtocol};
use oci_client::manifest::{OciDescriptor, OciManifest};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};

use crate::graph::Graph;
use crate::repository::ImageReference;

use super::{ProgressEvent, PulledImage, RegistryClient};

pub struct OciRegistryClient {
    client: Client,
}

impl Default for OciRegistryClient {
    fn default() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }
}

impl OciRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_oci_reference(reference: &ImageReference) -> EngineResult<Reference> {
        let registry = reference.registry.as_deref().unwrap_or("docker.io");
        let image = format!("{}/{}", reference.namespace, reference.repo);
        let tagged = match &reference.digest {
            Some(digest) => format!("{registry}/{image}@{digest}"),
            None => format!("{registry}/{image}:{}", reference.tag),
        };
        tagged
            .parse::<Reference>()
            .map_err(|e| EngineError::InvalidArgument(format!("invalid image reference: {e}")))
    }

    /// Resolve an `OciManifest` (possibly an index) down to the single
    /// image manifest for the host's platform, pulling a second manifest if
    /// needed. Mirrors `extract_image_manifest`'s index-walking branch.
    async fn resolve_image_manifest(
        &self,
        reference: &Reference,
        manifest: OciManifest,
    ) -> EngineResult<oci_client::manifest::OciImageManifest> {
        match manifest {
            OciManifest::Image(image) => Ok(image),
            OciManifest::ImageIndex(index) => {
                let entry = index
                    .manifests
                    .iter()
                    .find(|m| {
                        m.platform
                            .as_ref()
                            .map(|p| p.os == "linux" && p.architecture == std::env::consts::ARCH)
                            .unwrap_or(false)
                    })
                    .or_else(|| index.manifests.first())
                    .ok_or_else(|| {
                        EngineError::CorruptLayer("image index has no manifests".into())
                    })?;

                let platform_ref: Reference = format!("{}@{}", reference.whole(), entry.digest)
                    .parse()
                    .map_err(|e| {
                        EngineError::InvalidArgument(format!("invalid platform reference: {e}"))
                    })?;
                let (manifest, _digest) = self
                    .client
                    .pull_manifest(&platform_ref, &RegistryAuth::Anonymous)
                    .await
                    .map_err(|e| {
                        EngineError::DriverError(format!("failed to pull platform manifest: {e}"))
                    })?;
                match manifest {
                    OciManifest::Image(image) => Ok(image),
                    OciManifest::ImageIndex(_) => Err(EngineError::CorruptLayer(
                        "nested image index is not supported".into(),
                    )),
                }
            }
        }
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn pull_image(
        &self,
        reference: &ImageReference,
        graph: &Graph,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<PulledImage> {
        let oci_ref = Self::to_oci_reference(reference)?;

        sink(ProgressEvent::new(oci_ref.whole(), "Pulling manifest"));
        let (manifest, _manifest_digest) = self
            .client
            .pull_manifest(&oci_ref, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| EngineError::DriverError(format!("failed to pull manifest: {e}")))?;

        let image_manifest = self.resolve_image_manifest(&oci_ref, manifest).await?;

        let mut parent: Option<String> = None;
        for layer in &image_manifest.layers {
            sink(ProgressEvent::new(layer.digest.clone(), "Pulling fs layer"));

            let mut staged = tokio::fs::File::from_std(
                tempfile::tempfile().map_err(EngineError::Io)?,
            );
            self.client
                .pull_blob(&oci_ref, &descriptor_for(layer), &mut staged)
                .await
                .map_err(|e| {
                    EngineError::DriverError(format!("failed to pull layer {}: {e}", layer.digest))
                })?;

            let mut staged = staged.into_std().await;
            staged.rewind()?;

            let digest = layer.digest.clone();
            let parent_for_register = parent.clone();
            let registered = graph.register(
                parent_for_register.as_deref(),
                None,
                Some(format!("pull {}", oci_ref.whole())),
                &staged,
            )?;

            if registered != strip_digest_prefix(&digest) {
                tracing::debug!(
                    expected = %digest,
                    actual = %registered,
                    "registered layer id diverges from registry digest"
                );
            }
            sink(ProgressEvent::new(digest, "Download complete"));
            parent = Some(registered);
        }

        let top_layer_id = parent.ok_or_else(|| {
            EngineError::CorruptLayer(format!("{} has no layers", oci_ref.whole()))
        })?;

        sink(ProgressEvent::new(oci_ref.whole(), "Pull complete"));
        Ok(PulledImage { top_layer_id })
    }

    /// Push the layer chain rooted at `top_layer_id`, oldest layer first
    /// (the order `oci-client`'s high-level `push` expects), then let it
    /// assemble and upload the manifest. The inverse of `pull_image`: where
    /// pull walks the registry's manifest to discover layers, push walks
    /// the Graph's parent chain and re-tars each layer's extracted tree
    /// back into a blob, since the Graph stores layers unpacked rather than
    /// caching the original archives.
    async fn push_image(
        &self,
        reference: &ImageReference,
        top_layer_id: &str,
        graph: &Graph,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<()> {
        let oci_ref = Self::to_oci_reference(reference)?;
        let chain = graph.chain(top_layer_id)?;

        let mut layers = Vec::with_capacity(chain.len());
        for layer_id in &chain {
            sink(ProgressEvent::new(layer_id.clone(), "Pushing fs layer"));
            let tree_dir = graph.tree_dir(layer_id)?;
            let gzipped = tar_and_gzip_dir(&tree_dir)?;
            layers.push(ImageLayer::new(
                gzipped,
                oci_client::manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE.to_string(),
                None,
            ));
            sink(ProgressEvent::new(layer_id.clone(), "Layer pushed"));
        }

        let config = Config::oci_v1(minimal_oci_config(&chain), None);

        sink(ProgressEvent::new(oci_ref.whole(), "Pushing manifest"));
        self.client
            .push(
                &oci_ref,
                &layers,
                config,
                &RegistryAuth::Anonymous,
                None,
            )
            .await
            .map_err(|e| EngineError::DriverError(format!("push failed: {e}")))?;

        sink(ProgressEvent::new(oci_ref.whole(), "Push complete"));
        Ok(())
    }
}

fn descriptor_for(layer: &OciDescriptor) -> OciDescriptor {
    OciDescriptor {
        digest: layer.digest.clone(),
        media_type: layer.media_type.clone(),
        size: layer.size,
        urls: layer.urls.clone(),
        annotations: layer.annotations.clone(),
    }
}

fn strip_digest_prefix(digest: &str) -> String {
    digest
        .split_once(':')
        .map(|(_, hex)| hex.to_string())
        .unwrap_or_else(|| digest.to_string())
}

/// Re-tar a layer's extracted tree and gzip it, the inverse of the unpack
/// step `Graph::register` performs on pull.
fn tar_and_gzip_dir(tree_dir: &std::path::Path) -> EngineResult<Vec<u8>> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        builder
            .append_dir_all(".", tree_dir)
            .map_err(|e| EngineError::DriverError(format!("failed to tar layer: {e}")))?;
        builder
            .finish()
            .map_err(|e| EngineError::DriverError(format!("failed to tar layer: {e}")))?;
    }

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, &tar_bytes)?;
    encoder.finish().map_err(EngineError::Io)
}

/// A minimal, best-effort OCI image config blob. keel does not track the
/// full original config (entrypoint, labels, history) a registry push
/// normally round-trips — only enough (`rootfs.diff_ids`) for the manifest
/// to reference a valid config object.
fn minimal_oci_config(chain: &[String]) -> Vec<u8> {
    let diff_ids: Vec<String> = chain.iter().map(|id| format!("sha256:{id}")).collect();
    serde_json::json!({
        "architecture": std::env::consts::ARCH,
        "os": "linux",
        "rootfs": {
            "type": "layers",
            "diff_ids": diff_ids,
        },
        "config": {},
    })
    .to_string()
    .into_bytes()
}
