//! Content-addressed layer graph: `Register`/`Get`/`Delete`/`Heads`/`ByParent`.
//!
//! A facade over an `Arc`-shared index with its own internal locking: a
//! parent/child DAG with explicit per-layer refcounting, guarded by a
//! single short-lived mutex never held across syscalls.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use keel_shared::errors::{EngineError, EngineResult};

use super::layer::{compute_layer_id, LayerId, LayerMetadata};

#[derive(Debug, Default)]
struct GraphIndex {
    /// id -> (metadata, refcount). Refcount counts: child layers + tags +
    /// containers using this layer as their image.
    layers: HashMap<LayerId, (LayerMetadata, u64)>,
    /// parent -> children, maintained alongside `layers`.
    children: HashMap<LayerId, Vec<LayerId>>,
}

/// Persistent, content-addressed store of image layers.
///
/// Thread safety: all mutation goes through one `Mutex<GraphIndex>`, held
/// only for in-memory bookkeeping — never across the filesystem I/O that
/// extracts a layer archive, matching the "lock → mutate → persist → drop
/// lock → blocking primitive" pattern from the concurrency model.
#[derive(Clone)]
pub struct Graph {
    root: PathBuf,
    index: Arc<Mutex<GraphIndex>>,
}

impl Graph {
    /// Open (or initialize) the graph rooted at `<root>/graph`. Sweeps any
    /// leftover `*.tmp` staging directories from a prior crash.
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        sweep_stale_temp_dirs(&root)?;

        let mut index = GraphIndex::default();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                continue;
            }
            let meta_path = entry.path().join("json");
            if !meta_path.exists() {
                continue;
            }
            let bytes = std::fs::read(&meta_path)?;
            let metadata: LayerMetadata = serde_json::from_slice(&bytes)?;
            index.layers.insert(metadata.id.clone(), (metadata, 0));
        }
        // Rebuild refcounts from parent chains now that every layer is known.
        let ids: Vec<LayerId> = index.layers.keys().cloned().collect();
        for id in &ids {
            if let Some(parent) = index.layers[id].0.parent.clone() {
                index.children.entry(parent.clone()).or_default().push(id.clone());
                if let Some(entry) = index.layers.get_mut(&parent) {
                    entry.1 += 1;
                }
            }
        }

        Ok(Self {
            root,
            index: Arc::new(Mutex::new(index)),
        })
    }

    fn layer_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Host path of a layer's extracted filesystem tree, e.g. for
    /// re-tarring on push or for the storage driver's lowerdir chain.
    pub fn tree_dir(&self, id: &str) -> EngineResult<PathBuf> {
        self.get(id)?;
        Ok(self.layer_dir(id).join("tree"))
    }

    /// Stage `archive` (a tar stream) under a temp directory, extract it,
    /// compute its id, then atomically rename into place. Returns the new
    /// layer's id.
    ///
    /// Concurrent calls for the same resulting id are serialized by the
    /// index lock; the loser simply observes the winner already registered
    /// and returns success without re-extracting.
    pub fn register(
        &self,
        parent: Option<&str>,
        author: Option<String>,
        created_by: Option<String>,
        mut archive: impl Read,
    ) -> EngineResult<LayerId> {
        if let Some(parent) = parent {
            self.get(parent)?; // enforces "parent existence is enforced on insert"
        }

        let mut bytes = Vec::new();
        archive.read_to_end(&mut bytes)?;
        let id = compute_layer_id(parent, &bytes);

        // Fast path: already registered (by us or a racing caller).
        if self.get(&id).is_ok() {
            tracing::debug!(layer = %id, "register: already present, skipping re-extraction");
            return Ok(id);
        }

        let tmp_dir = self.root.join(format!("{id}.tmp-{}", std::process::id()));
        std::fs::create_dir_all(&tmp_dir)?;
        let tree_dir = tmp_dir.join("tree");
        std::fs::create_dir_all(&tree_dir)?;

        let mut archive_reader = tar::Archive::new(bytes.as_slice());
        archive_reader
            .unpack(&tree_dir)
            .map_err(|e| EngineError::DriverError(format!("layer extraction failed: {e}")))?;

        let size = dir_size(&tree_dir)?;
        let metadata = LayerMetadata {
            id: id.clone(),
            parent: parent.map(|p| p.to_string()),
            author,
            created_by,
            created_at: chrono::Utc::now(),
            size,
            checksum: None,
        };
        std::fs::write(tmp_dir.join("json"), serde_json::to_vec_pretty(&metadata)?)?;
        std::fs::write(tmp_dir.join("layersize"), size.to_string())?;

        let final_dir = self.layer_dir(&id);
        {
            let mut index = self.index.lock().unwrap();
            if index.layers.contains_key(&id) {
                // Lost the race; drop our staged copy and reuse the winner's.
                let _ = std::fs::remove_dir_all(&tmp_dir);
                return Ok(id);
            }
            match std::fs::rename(&tmp_dir, &final_dir) {
                Ok(()) => {}
                Err(e) if final_dir.exists() => {
                    // Someone else won the rename race between our check and now.
                    let _ = std::fs::remove_dir_all(&tmp_dir);
                    let _ = e;
                }
                Err(e) => return Err(e.into()),
            }
            index.layers.insert(id.clone(), (metadata.clone(), 0));
            if let Some(parent) = &metadata.parent {
                index.children.entry(parent.clone()).or_default().push(id.clone());
                if let Some(entry) = index.layers.get_mut(parent) {
                    entry.1 += 1;
                }
            }
        }

        tracing::info!(layer = %id, parent = ?parent, "registered layer");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> EngineResult<LayerMetadata> {
        let index = self.index.lock().unwrap();
        index
            .layers
            .get(id)
            .map(|(m, _)| m.clone())
            .ok_or_else(|| EngineError::NotFound(format!("layer {id}")))
    }

    /// Increment a layer's refcount (tag or container now references it).
    pub fn pin(&self, id: &str) -> EngineResult<()> {
        let mut index = self.index.lock().unwrap();
        let entry = index
            .layers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("layer {id}")))?;
        entry.1 += 1;
        Ok(())
    }

    /// Decrement a layer's refcount.
    pub fn unpin(&self, id: &str) -> EngineResult<()> {
        let mut index = self.index.lock().unwrap();
        let entry = index
            .layers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("layer {id}")))?;
        entry.1 = entry.1.saturating_sub(1);
        Ok(())
    }

    pub fn refcount(&self, id: &str) -> EngineResult<u64> {
        let index = self.index.lock().unwrap();
        index
            .layers
            .get(id)
            .map(|(_, rc)| *rc)
            .ok_or_else(|| EngineError::NotFound(format!("layer {id}")))
    }

    /// Remove a layer; fails with `InUse` if its refcount is nonzero.
    pub fn delete(&self, id: &str) -> EngineResult<()> {
        let parent = {
            let mut index = self.index.lock().unwrap();
            let (metadata, refcount) = index
                .layers
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("layer {id}")))?
                .clone();
            if refcount != 0 {
                return Err(EngineError::InUse(format!(
                    "layer {id} has {refcount} reference(s)"
                )));
            }
            index.layers.remove(id);
            if let Some(parent) = &metadata.parent {
                if let Some(children) = index.children.get_mut(parent) {
                    children.retain(|c| c != id);
                }
                if let Some(entry) = index.layers.get_mut(parent) {
                    entry.1 = entry.1.saturating_sub(1);
                }
            }
            metadata.parent
        };
        std::fs::remove_dir_all(self.layer_dir(id))?;
        tracing::info!(layer = %id, parent = ?parent, "deleted layer");
        Ok(())
    }

    /// Layers with zero children (used by disk-usage tooling).
    pub fn heads(&self) -> Vec<LayerId> {
        let index = self.index.lock().unwrap();
        index
            .layers
            .keys()
            .filter(|id| {
                index
                    .children
                    .get(*id)
                    .map(|c| c.is_empty())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn by_parent(&self) -> HashMap<LayerId, Vec<LayerId>> {
        let index = self.index.lock().unwrap();
        index.children.clone()
    }

    /// Aggregate size of every registered layer (for `GET /system/df`).
    pub fn total_size(&self) -> u64 {
        let index = self.index.lock().unwrap();
        index.layers.values().map(|(m, _)| m.size).sum()
    }

    pub fn len(&self) -> usize {
        self.index.lock().unwrap().layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the full parent-first chain for an image id (topmost layer).
    pub fn chain(&self, image_id: &str) -> EngineResult<Vec<LayerId>> {
        let mut chain = Vec::new();
        let mut current = Some(image_id.to_string());
        while let Some(id) = current {
            let metadata = self.get(&id)?;
            current = metadata.parent.clone();
            chain.push(id);
        }
        chain.reverse();
        Ok(chain)
    }
}

fn dir_size(path: &Path) -> EngineResult<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| EngineError::Internal(e.to_string()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| EngineError::Internal(e.to_string()))?.len();
        }
    }
    Ok(total)
}

fn sweep_stale_temp_dirs(root: &Path) -> EngineResult<()> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains(".tmp-") {
            tracing::warn!(dir = %name, "sweeping stale graph staging directory from prior crash");
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn register_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let archive = make_tar(&[("hello.txt", b"world")]);

        let id = graph
            .register(None, Some("me".into()), Some("FROM scratch".into()), archive.as_slice())
            .unwrap();

        let metadata = graph.get(&id).unwrap();
        assert_eq!(metadata.id, id);
        assert!(metadata.parent.is_none());
    }

    #[test]
    fn register_rejects_missing_parent() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let archive = make_tar(&[("a", b"1")]);
        let result = graph.register(Some("does-not-exist"), None, None, archive.as_slice());
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn delete_fails_while_referenced() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let root_archive = make_tar(&[("a", b"1")]);
        let root_id = graph.register(None, None, None, root_archive.as_slice()).unwrap();

        let child_archive = make_tar(&[("b", b"2")]);
        let _child_id = graph
            .register(Some(&root_id), None, None, child_archive.as_slice())
            .unwrap();

        let result = graph.delete(&root_id);
        assert!(matches!(result, Err(EngineError::InUse(_))));
    }

    #[test]
    fn delete_succeeds_once_unreferenced() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let archive = make_tar(&[("a", b"1")]);
        let id = graph.register(None, None, None, archive.as_slice()).unwrap();

        graph.delete(&id).unwrap();
        assert!(matches!(graph.get(&id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn heads_excludes_layers_with_children() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let root_archive = make_tar(&[("a", b"1")]);
        let root_id = graph.register(None, None, None, root_archive.as_slice()).unwrap();
        let child_archive = make_tar(&[("b", b"2")]);
        let child_id = graph
            .register(Some(&root_id), None, None, child_archive.as_slice())
            .unwrap();

        let heads = graph.heads();
        assert!(heads.contains(&child_id));
        assert!(!heads.contains(&root_id));
    }

    #[test]
    fn chain_is_parent_first() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let a = graph.register(None, None, None, make_tar(&[("a", b"1")]).as_slice()).unwrap();
        let b = graph
            .register(Some(&a), None, None, make_tar(&[("b", b"2")]).as_slice())
            .unwrap();

        let chain = graph.chain(&b).unwrap();
        assert_eq!(chain, vec![a, b]);
    }

    #[test]
    fn register_is_idempotent_for_identical_content() {
        let tmp = TempDir::new().unwrap();
        let graph = Graph::open(tmp.path()).unwrap();
        let archive = make_tar(&[("a", b"1")]);

        let id1 = graph.register(None, None, None, archive.as_slice()).unwrap();
        let id2 = graph.register(None, None, None, archive.as_slice()).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(graph.len(), 1);
    }
}
