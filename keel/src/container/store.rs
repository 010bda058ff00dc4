//! On-disk container store.
//!
//! An in-memory index (`RwLock<HashMap<ContainerId, Container>>`) backed by
//! a `state.json` per container, which is the single source of truth across
//! daemon restarts: the in-memory copy is a cache rebuilt at boot. Every
//! mutation goes through `save`, which writes `state.json` before
//! returning, the same pattern `repository::Repositories::persist` uses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use keel_shared::errors::{EngineError, EngineResult};
use keel_shared::layout::{ContainerLayout, DaemonLayout};

use super::types::{Container, ContainerConfig, ContainerId, ContainerState};

#[derive(Debug, Default)]
struct StoreInner {
    containers: HashMap<ContainerId, Container>,
    /// name -> id, kept in step with `containers` for `Lookup` by name.
    names: HashMap<String, ContainerId>,
}

/// Thread-safe registry of every known container, backed by `containers/`.
#[derive(Clone)]
pub struct ContainerStore {
    layout: DaemonLayout,
    inner: Arc<RwLock<StoreInner>>,
}

impl ContainerStore {
    /// Create an empty store rooted at `layout`; does not load from disk.
    /// Use [`open`](Self::open) to rebuild from a prior run.
    pub fn new(layout: DaemonLayout) -> Self {
        Self {
            layout,
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Rebuild the in-memory cache from every `containers/<id>/state.json`
    /// found on disk.
    pub fn open(layout: DaemonLayout) -> EngineResult<Self> {
        let store = Self::new(layout.clone());
        let dir = layout.containers_dir();
        if !dir.exists() {
            return Ok(store);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let container_layout = ContainerLayout::new(entry.path());
            let state_path = container_layout.state_json();
            if !state_path.exists() {
                continue;
            }
            let bytes = std::fs::read(&state_path)?;
            match serde_json::from_slice::<Container>(&bytes) {
                Ok(container) => {
                    let mut inner = store.inner.write().unwrap();
                    inner.names.insert(container.name.clone(), container.id.clone());
                    inner.containers.insert(container.id.clone(), container);
                }
                Err(e) => {
                    tracing::warn!(path = %state_path.display(), error = %e, "skipping unreadable container state");
                }
            }
        }
        Ok(store)
    }

    fn container_layout(&self, id: &str) -> ContainerLayout {
        ContainerLayout::new(self.layout.container_dir(id))
    }

    /// Create and persist a new container record.
    pub fn register(
        &self,
        id: ContainerId,
        name: String,
        image_id: String,
        config: ContainerConfig,
    ) -> EngineResult<Container> {
        let mut inner = self.inner.write().unwrap();
        if inner.containers.contains_key(&id) {
            return Err(EngineError::InvalidArgument(format!(
                "container {id} already registered"
            )));
        }
        if inner.names.contains_key(&name) {
            return Err(EngineError::NameConflict(name));
        }

        let container = Container::new(id.clone(), name.clone(), image_id, config);
        let layout = self.container_layout(&id);
        layout.prepare()?;
        persist(&layout, &container)?;

        inner.names.insert(name, id.clone());
        inner.containers.insert(id, container.clone());
        Ok(container)
    }

    /// Persist `container` (after the caller has mutated it) and update
    /// the cache. The write happens before the lock is dropped, so a
    /// concurrent reader never observes a state.json mismatch.
    pub fn save(&self, container: &Container) -> EngineResult<()> {
        let layout = self.container_layout(&container.id);
        persist(&layout, container)?;
        let mut inner = self.inner.write().unwrap();
        inner.containers.insert(container.id.clone(), container.clone());
        Ok(())
    }

    /// Resolve `id_or_name_or_prefix`: exact id, exact name, or the unique
    /// hex-prefix match; ambiguous prefixes are an error.
    pub fn lookup(&self, reference: &str) -> EngineResult<Container> {
        let inner = self.inner.read().unwrap();
        if let Some(container) = inner.containers.get(reference) {
            return Ok(container.clone());
        }
        if let Some(id) = inner.names.get(reference) {
            return Ok(inner.containers[id].clone());
        }

        let mut matches: Vec<&Container> = inner
            .containers
            .values()
            .filter(|c| c.id.starts_with(reference))
            .collect();
        match matches.len() {
            0 => Err(EngineError::NotFound(format!("container {reference}"))),
            1 => Ok(matches.remove(0).clone()),
            _ => Err(EngineError::InvalidArgument(format!(
                "ambiguous container reference {reference}"
            ))),
        }
    }

    pub fn list(&self) -> Vec<Container> {
        let inner = self.inner.read().unwrap();
        let mut containers: Vec<Container> = inner.containers.values().cloned().collect();
        containers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        containers
    }

    pub fn list_by_state(&self, state: ContainerState) -> Vec<Container> {
        self.list().into_iter().filter(|c| c.state == state).collect()
    }

    /// Remove a container's record and on-disk directory. Refuses active
    /// containers; callers must `Stop`/`Kill` first.
    pub fn delete(&self, id: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        let container = inner
            .containers
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("container {id}")))?;
        if !container.state.can_remove() {
            return Err(EngineError::StateConflict(format!(
                "container {id} is {:?}",
                container.state
            )));
        }

        let dir = self.layout.container_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        let container = inner.containers.remove(id).unwrap();
        inner.names.remove(&container.name);
        Ok(())
    }
}

fn persist(layout: &ContainerLayout, container: &Container) -> EngineResult<()> {
    layout.prepare()?;
    write_atomic(&layout.config_json(), &container.config)?;
    write_atomic(&layout.hostconfig_json(), &container.host_config)?;
    write_atomic(&layout.state_json(), container)?;
    Ok(())
}

fn write_atomic<T: serde::Serialize>(path: &std::path::Path, value: &T) -> EngineResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::types::ContainerConfig;
    use tempfile::TempDir;

    fn config() -> ContainerConfig {
        ContainerConfig {
            image: "alpine".into(),
            cmd: vec!["/bin/sh".into()],
            entrypoint: vec![],
            env: vec![],
            working_dir: None,
            exposed_ports: vec![],
            volumes: vec![],
            resources: Default::default(),
            tty: false,
            open_stdin: false,
            hostname: None,
            labels: Default::default(),
        }
    }

    #[test]
    fn register_then_lookup_by_id_name_and_prefix() {
        let tmp = TempDir::new().unwrap();
        let store = ContainerStore::new(DaemonLayout::new(tmp.path()));
        store
            .register("abc123def".into(), "brave-fox".into(), "img1".into(), config())
            .unwrap();

        assert_eq!(store.lookup("abc123def").unwrap().id, "abc123def");
        assert_eq!(store.lookup("brave-fox").unwrap().id, "abc123def");
        assert_eq!(store.lookup("abc1").unwrap().id, "abc123def");
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let tmp = TempDir::new().unwrap();
        let store = ContainerStore::new(DaemonLayout::new(tmp.path()));
        store.register("id1".into(), "same".into(), "img".into(), config()).unwrap();
        let result = store.register("id2".into(), "same".into(), "img".into(), config());
        assert!(matches!(result, Err(EngineError::NameConflict(_))));
    }

    #[test]
    fn delete_rejects_running_container() {
        let tmp = TempDir::new().unwrap();
        let store = ContainerStore::new(DaemonLayout::new(tmp.path()));
        let mut container = store
            .register("id1".into(), "name1".into(), "img".into(), config())
            .unwrap();
        container.state = ContainerState::Running;
        store.save(&container).unwrap();

        assert!(matches!(store.delete("id1"), Err(EngineError::StateConflict(_))));
    }

    #[test]
    fn open_rebuilds_from_disk() {
        let tmp = TempDir::new().unwrap();
        let layout = DaemonLayout::new(tmp.path());
        {
            let store = ContainerStore::new(layout.clone());
            store.register("id1".into(), "name1".into(), "img".into(), config()).unwrap();
        }
        let reopened = ContainerStore::open(layout).unwrap();
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.lookup("name1").unwrap().id, "id1");
    }
}
