//! Repositories/Tags: human-readable names → image IDs.
//!
//! Persisted as a single JSON file, `<root>/repositories-<driver>`, mapping
//! repository → tag → image id. The whole file is rewritten on every
//! mutation, same as the rest of the daemon's flat-file state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use keel_shared::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

use crate::graph::Graph;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
struct RepoFile {
    /// repository -> (tag -> image id)
    repos: HashMap<String, HashMap<String, String>>,
}

/// A parsed image reference: `[registry/][namespace/]repo[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub namespace: String,
    pub repo: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Repository key used inside the tag map: `[registry/]namespace/repo`.
    pub fn repo_key(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{}/{}", self.namespace, self.repo),
            None => format!("{}/{}", self.namespace, self.repo),
        }
    }
}

/// Parse a user-supplied image name, defaulting `namespace=library`,
/// `tag=latest`.
pub fn parse_reference(name: &str) -> EngineResult<ImageReference> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument("empty image reference".into()));
    }

    let (name_part, digest) = match name.split_once('@') {
        Some((n, d)) => (n, Some(d.to_string())),
        None => (name, None),
    };

    let mut segments: Vec<&str> = name_part.split('/').collect();
    let last = segments
        .pop()
        .ok_or_else(|| EngineError::InvalidArgument("empty image reference".into()))?;

    let (repo, tag) = match last.split_once(':') {
        Some((r, t)) => (r.to_string(), t.to_string()),
        None => (last.to_string(), "latest".to_string()),
    };
    if repo.is_empty() {
        return Err(EngineError::InvalidArgument(format!("invalid reference: {name}")));
    }

    let (registry, namespace) = match segments.len() {
        0 => (None, "library".to_string()),
        1 => (None, segments[0].to_string()),
        _ => {
            let registry = segments[0].to_string();
            let namespace = segments[1..].join("/");
            (Some(registry), namespace)
        }
    };

    Ok(ImageReference {
        registry,
        namespace,
        repo,
        tag,
        digest,
    })
}

/// Tag map persisted at `<root>/repositories-<driver>`.
pub struct Repositories {
    path: PathBuf,
    inner: Mutex<RepoFile>,
}

impl Repositories {
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let file = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            RepoFile::default()
        };
        Ok(Self {
            path,
            inner: Mutex::new(file),
        })
    }

    fn persist(&self, file: &RepoFile) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Tag `repo:tag -> image_id`, verifying the image exists in `graph`.
    pub fn tag(&self, reference: &ImageReference, image_id: &str, graph: &Graph) -> EngineResult<()> {
        graph.get(image_id)?; // "the referenced image ID must exist in the Graph"
        let mut file = self.inner.lock().unwrap();
        let repo = file.repos.entry(reference.repo_key()).or_default();

        if let Some(previous) = repo.get(&reference.tag) {
            if previous != image_id {
                let _ = graph.unpin(previous);
            } else {
                return Ok(());
            }
        }
        repo.insert(reference.tag.clone(), image_id.to_string());
        graph.pin(image_id)?;
        self.persist(&file)?;
        Ok(())
    }

    pub fn untag(&self, reference: &ImageReference, graph: &Graph) -> EngineResult<()> {
        let mut file = self.inner.lock().unwrap();
        let removed = file
            .repos
            .get_mut(&reference.repo_key())
            .and_then(|repo| repo.remove(&reference.tag));
        match removed {
            Some(image_id) => {
                let _ = graph.unpin(&image_id);
                self.persist(&file)?;
                Ok(())
            }
            None => Err(EngineError::NotFound(format!(
                "tag {}:{}",
                reference.repo_key(),
                reference.tag
            ))),
        }
    }

    pub fn lookup(&self, reference: &ImageReference) -> EngineResult<String> {
        let file = self.inner.lock().unwrap();
        file.repos
            .get(&reference.repo_key())
            .and_then(|repo| repo.get(&reference.tag))
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!("{}:{}", reference.repo_key(), reference.tag))
            })
    }

    pub fn delete(&self, repo: &str, tag: &str, graph: &Graph) -> EngineResult<()> {
        let mut file = self.inner.lock().unwrap();
        let removed = file.repos.get_mut(repo).and_then(|t| t.remove(tag));
        match removed {
            Some(image_id) => {
                let _ = graph.unpin(&image_id);
                self.persist(&file)?;
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("{repo}:{tag}"))),
        }
    }

    /// All `(repo, tag, image_id)` triples, for `GET /images/json`.
    pub fn list(&self) -> Vec<(String, String, String)> {
        let file = self.inner.lock().unwrap();
        file.repos
            .iter()
            .flat_map(|(repo, tags)| {
                tags.iter()
                    .map(move |(tag, id)| (repo.clone(), tag.clone(), id.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use tempfile::TempDir;

    fn make_graph(tmp: &TempDir) -> Graph {
        Graph::open(tmp.path().join("graph")).unwrap()
    }

    fn register_image(graph: &Graph) -> String {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "f", &b"1"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();
        graph.register(None, None, None, bytes.as_slice()).unwrap()
    }

    #[test]
    fn parse_reference_applies_defaults() {
        let r = parse_reference("alpine").unwrap();
        assert_eq!(r.namespace, "library");
        assert_eq!(r.repo, "alpine");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn parse_reference_with_registry_namespace_and_tag() {
        let r = parse_reference("registry.example.com/acme/app:v2").unwrap();
        assert_eq!(r.registry.as_deref(), Some("registry.example.com"));
        assert_eq!(r.namespace, "acme");
        assert_eq!(r.repo, "app");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn tag_then_lookup_round_trips() {
        let tmp = TempDir::new().unwrap();
        let graph = make_graph(&tmp);
        let id = register_image(&graph);
        let repos = Repositories::open(tmp.path().join("repositories-vfs")).unwrap();

        let reference = parse_reference("myapp:latest").unwrap();
        repos.tag(&reference, &id, &graph).unwrap();
        assert_eq!(repos.lookup(&reference).unwrap(), id);
        assert_eq!(graph.refcount(&id).unwrap(), 1);
    }

    #[test]
    fn tag_rejects_nonexistent_image() {
        let tmp = TempDir::new().unwrap();
        let graph = make_graph(&tmp);
        let repos = Repositories::open(tmp.path().join("repositories-vfs")).unwrap();
        let reference = parse_reference("myapp:latest").unwrap();
        let result = repos.tag(&reference, "deadbeef", &graph);
        assert!(result.is_err());
    }

    #[test]
    fn untag_releases_graph_pin() {
        let tmp = TempDir::new().unwrap();
        let graph = make_graph(&tmp);
        let id = register_image(&graph);
        let repos = Repositories::open(tmp.path().join("repositories-vfs")).unwrap();
        let reference = parse_reference("myapp:latest").unwrap();
        repos.tag(&reference, &id, &graph).unwrap();

        repos.untag(&reference, &graph).unwrap();
        assert_eq!(graph.refcount(&id).unwrap(), 0);
        assert!(repos.lookup(&reference).is_err());
    }
}
