//! Top-level facade wiring every component together.
//!
//! The single object the API layer is built against: it owns the Graph,
//! Repositories, Container Store/Runtime, Storage Driver and Network
//! Driver. Lock acquisition order across components is fixed:
//! Repositories → Graph → Container → Network, never the reverse.

use std::sync::Arc;
use std::time::Duration;

use keel_shared::errors::{EngineError, EngineResult};
use keel_shared::events::Event;
use keel_shared::layout::DaemonLayout;
use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EngineOptions;
use crate::container::{
    AttachHandle, Container, ContainerConfig, ContainerRuntime, ContainerState, ContainerStore,
    ExecConfig, ExecSession, HostConfig, JournalRecord,
};
use crate::graph::Graph;
use crate::lock::DaemonLock;
use crate::network::{BridgeNetworkDriver, NetworkDriver};
use crate::registry::{OciRegistryClient, ProgressEvent, PulledImage, RegistryClient};
use crate::repository::{parse_reference, ImageReference, Repositories};
use crate::storage::{probe_driver, StorageDriver};

use keel_shared::constants::EVENTS_QUEUE_CAPACITY;

/// Everything a running daemon needs, built once at boot and shared behind
/// an `Arc` with every API handler and background task.
pub struct Engine {
    pub options: EngineOptions,
    pub layout: DaemonLayout,
    _lock: DaemonLock,

    pub graph: Arc<Graph>,
    pub repositories: Arc<Repositories>,
    pub registry: Arc<dyn RegistryClient>,
    pub runtime: Arc<ContainerRuntime>,
    pub network: Arc<dyn NetworkDriver>,
    pub storage: Arc<dyn StorageDriver>,

    events: broadcast::Sender<Event>,
}

impl Engine {
    /// Daemon boot sequence: acquire the lock, init storage, load the
    /// graph and repositories, init networking, recover containers.
    /// Opening API sockets is the caller's job once this returns.
    pub async fn boot(options: EngineOptions) -> EngineResult<Arc<Self>> {
        let layout = DaemonLayout::new(&options.home_dir);
        layout.prepare()?;

        let lock = DaemonLock::acquire(&options.home_dir)?;

        let storage: Arc<dyn StorageDriver> =
            Arc::from(probe_driver(&options.driver_probe_order, &layout.root().join("storage"))?);
        tracing::info!(driver = storage.name(), "storage driver initialized");

        let graph = Arc::new(Graph::open(layout.graph_dir())?);
        let repositories = Arc::new(Repositories::open(
            layout.repositories_file(storage.name()),
        )?);

        let network: Arc<dyn NetworkDriver> = Arc::new(BridgeNetworkDriver::boot().await?);

        let registry: Arc<dyn RegistryClient> = Arc::new(OciRegistryClient::new());

        let store = ContainerStore::open(layout.clone())?;

        // `Graph::open` only rebuilds refcounts from parent/child chains;
        // it knows nothing about tags or containers. Re-pin every loaded
        // tag and every container's image so a restart doesn't leave a
        // still-referenced layer with a refcount that omits them.
        for (_repo, _tag, image_id) in repositories.list() {
            if let Err(e) = graph.pin(&image_id) {
                tracing::warn!(image = %image_id, error = %e, "failed to re-pin tagged image at boot");
            }
        }
        for container in store.list() {
            if let Err(e) = graph.pin(&container.image_id) {
                tracing::warn!(container = %container.id, image = %container.image_id, error = %e, "failed to re-pin container image at boot");
            }
        }

        let exec_driver = Arc::new(crate::execdriver::LinuxExecutionDriver);
        let runtime = ContainerRuntime::new_arc(
            layout.clone(),
            store,
            graph.clone(),
            storage.clone(),
            network.clone(),
            exec_driver,
        );

        crate::container::recover(&runtime).await?;

        let (events, _) = broadcast::channel(EVENTS_QUEUE_CAPACITY);

        Ok(Arc::new(Self {
            options,
            layout,
            _lock: lock,
            graph,
            repositories,
            registry,
            runtime,
            network,
            storage,
            events,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    // ---- Images -----------------------------------------------------

    pub fn parse_image_reference(&self, name: &str) -> EngineResult<ImageReference> {
        parse_reference(name)
    }

    /// `POST /images/create`: resolve `name`, pull every layer, tag it.
    pub async fn pull_image(
        &self,
        name: &str,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<PulledImage> {
        let reference = parse_reference(name)?;
        let pulled = self.registry.pull_image(&reference, &self.graph, sink).await?;
        self.repositories.tag(&reference, &pulled.top_layer_id, &self.graph)?;
        self.emit(Event::image(name, "pull"));
        Ok(pulled)
    }

    pub fn list_images(&self) -> Vec<(String, String, String)> {
        self.repositories.list()
    }

    pub fn remove_image(&self, name: &str) -> EngineResult<()> {
        let reference = parse_reference(name)?;
        self.repositories.untag(&reference, &self.graph)?;
        self.emit(Event::image(name, "delete"));
        Ok(())
    }

    /// `POST /images/{name}/push`: upload the layer chain tagged `name` to
    /// its registry.
    pub async fn push_image(
        &self,
        name: &str,
        sink: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> EngineResult<()> {
        let reference = parse_reference(name)?;
        let top_layer_id = self.repositories.lookup(&reference)?;
        self.registry
            .push_image(&reference, &top_layer_id, &self.graph, sink)
            .await?;
        self.emit(Event::image(name, "push"));
        Ok(())
    }

    // ---- Containers ---------------------------------------------------

    /// `POST /containers/create`.
    pub fn create_container(
        &self,
        name: Option<String>,
        image: &str,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> EngineResult<Container> {
        let reference = parse_reference(image)?;
        let image_id = self.repositories.lookup(&reference)?;
        self.graph.pin(&image_id)?;

        let id = Uuid::new_v4().simple().to_string();
        let name = match name {
            Some(name) => name,
            None => self.generate_unique_name()?,
        };

        let mut container = self
            .runtime
            .store()
            .register(id.clone(), name, image_id, config)?;
        container.host_config = host_config;
        self.runtime.store().save(&container)?;

        self.emit(Event::container(&container.id, "create", container.version));
        Ok(container)
    }

    pub async fn start_container(&self, reference: &str) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.start(&container.id).await?;
        let after = self.runtime.store().lookup(&container.id)?;
        self.emit(Event::container(&after.id, "start", after.version));
        Ok(())
    }

    pub async fn stop_container(&self, reference: &str, timeout: Option<Duration>) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        let timeout = timeout.unwrap_or_else(|| {
            Duration::from_secs(self.options.shutdown_timeout_secs)
        });
        self.runtime.stop(&container.id, timeout).await?;
        self.emit(Event::container(&container.id, "stop", container.version + 1));
        Ok(())
    }

    pub fn kill_container(&self, reference: &str, signal: Signal) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.kill(&container.id, signal)?;
        self.emit(Event::container(&container.id, "kill", container.version));
        Ok(())
    }

    pub async fn restart_container(&self, reference: &str, timeout: Option<Duration>) -> EngineResult<()> {
        self.stop_container(reference, timeout).await?;
        self.start_container(reference).await
    }

    pub async fn wait_container(&self, reference: &str) -> EngineResult<i32> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.wait(&container.id).await
    }

    pub async fn pause_container(&self, reference: &str) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.pause(&container.id).await?;
        self.emit(Event::container(&container.id, "pause", container.version + 1));
        Ok(())
    }

    pub async fn unpause_container(&self, reference: &str) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.unpause(&container.id).await?;
        self.emit(Event::container(&container.id, "unpause", container.version + 1));
        Ok(())
    }

    /// `DELETE /containers/{id}`: destroyed only from `created | exited`
    /// unless `force=true`, in which case a running/paused container is
    /// killed and its exit finalized (rootfs unmounted, network endpoint
    /// released) before the record is deleted.
    pub async fn remove_container(&self, reference: &str, force: bool) -> EngineResult<()> {
        let mut container = self.runtime.store().lookup(reference)?;

        if !force && !container.state.can_remove() {
            return Err(EngineError::StateConflict(format!(
                "cannot remove container in state {:?} without force",
                container.state
            )));
        }

        if force && container.state.is_active() {
            self.runtime.kill(&container.id, Signal::SIGKILL)?;
            self.runtime.wait(&container.id).await?;
            container = self.runtime.store().lookup(&container.id)?;
        }

        container.removal_in_progress = true;
        self.runtime.store().save(&container)?;

        self.runtime.store().delete(&container.id)?;
        let _ = self.graph.unpin(&container.image_id);
        self.emit(Event::container(&container.id, "destroy", container.version + 1));
        Ok(())
    }

    pub fn inspect_container(&self, reference: &str) -> EngineResult<Container> {
        self.runtime.store().lookup(reference)
    }

    /// `POST /containers/{id}/attach`: hijack the connection and wire it to
    /// the container's live stdio.
    pub fn attach_container(&self, reference: &str, logs: bool) -> EngineResult<AttachHandle> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.attach(&container.id, logs)
    }

    /// `POST /containers/{id}/resize`.
    pub fn resize_container(&self, reference: &str, rows: u16, cols: u16) -> EngineResult<()> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.resize(&container.id, rows, cols)
    }

    /// `GET /containers/{id}/logs`: the full on-disk journal, oldest first.
    pub fn container_logs(&self, reference: &str) -> EngineResult<Vec<JournalRecord>> {
        let container = self.runtime.store().lookup(reference)?;
        self.runtime.logs(&container.id)
    }

    pub fn list_containers(&self, all: bool) -> Vec<Container> {
        let containers = self.runtime.store().list();
        if all {
            containers
        } else {
            containers
                .into_iter()
                .filter(|c| c.state != ContainerState::Exited)
                .collect()
        }
    }

    /// `POST /commit`: snapshot a container's writable layer as a new,
    /// immutable image layer. Running the resulting image reproduces the
    /// container's rootfs.
    pub fn commit_container(
        &self,
        reference: &str,
        repo_tag: Option<&str>,
        author: Option<String>,
        comment: Option<String>,
    ) -> EngineResult<String> {
        let container = self.runtime.store().lookup(reference)?;
        let diff = self.storage.diff(&container.id)?;
        let image_id = self
            .graph
            .register(Some(&container.image_id), author, comment, diff.as_slice())?;

        if let Some(repo_tag) = repo_tag {
            let parsed = parse_reference(repo_tag)?;
            self.repositories.tag(&parsed, &image_id, &self.graph)?;
        }
        self.emit(Event::image(&image_id, "commit"));
        Ok(image_id)
    }

    // ---- Exec -----------------------------------------------------

    /// `POST /containers/{id}/exec`: register a process to join an
    /// already-running container's namespaces; does not start it.
    pub fn create_exec(
        &self,
        reference: &str,
        argv: Vec<String>,
        env: Vec<String>,
        working_dir: Option<String>,
        tty: bool,
    ) -> EngineResult<String> {
        let container = self.runtime.store().lookup(reference)?;
        let config = ExecConfig {
            argv,
            env,
            working_dir,
            tty,
        };
        self.runtime.create_exec(&container.id, config)
    }

    /// `POST /exec/{id}/start`: hijack the connection and wire it to the
    /// new process's stdio, the same as `attach_container` does for a
    /// container's own init process.
    pub fn start_exec(&self, exec_id: &str) -> EngineResult<AttachHandle> {
        self.runtime.start_exec(exec_id)
    }

    pub fn exec_attach(&self, exec_id: &str) -> EngineResult<AttachHandle> {
        self.runtime.exec_attach(exec_id)
    }

    pub fn exec_inspect(&self, exec_id: &str) -> EngineResult<ExecSession> {
        self.runtime.exec_inspect(exec_id)
    }

    pub async fn exec_wait(&self, exec_id: &str) -> EngineResult<i32> {
        self.runtime.exec_wait(exec_id).await
    }

    pub fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> EngineResult<()> {
        self.runtime.exec_resize(exec_id, rows, cols)
    }

    // ---- System ---------------------------------------------------

    pub fn disk_usage_bytes(&self) -> u64 {
        self.graph.total_size()
    }

    /// `GET /system/df`: aggregate sizes for the disk-usage breakdown.
    pub fn disk_usage(&self) -> DiskUsage {
        let containers = self.runtime.store().list();
        let containers_bytes: u64 = containers
            .iter()
            .filter_map(|c| c.rootfs.as_ref())
            .filter_map(|path| dir_size(std::path::Path::new(path)).ok())
            .sum();
        let heads = self.graph.heads();
        let reclaimable_bytes: u64 = heads
            .iter()
            .filter(|id| self.graph.refcount(id).unwrap_or(1) == 0)
            .filter_map(|id| self.graph.get(id).ok())
            .map(|m| m.size)
            .sum();

        DiskUsage {
            layers_bytes: self.graph.total_size(),
            containers_bytes,
            reclaimable_bytes,
            layer_count: self.graph.len(),
            container_count: containers.len(),
        }
    }

    /// Best-effort shutdown: stop every active container within the
    /// configured timeout, or leave it running when `live_restore` is set
    ///.
    pub async fn shutdown(&self) {
        if self.options.live_restore {
            tracing::info!("live-restore enabled, leaving running containers attached");
            return;
        }
        let timeout = Duration::from_secs(self.options.shutdown_timeout_secs);
        for container in self.runtime.store().list_by_state(ContainerState::Running) {
            if let Err(e) = self.runtime.stop(&container.id, timeout).await {
                tracing::warn!(container = %container.id, error = %e, "graceful stop failed during shutdown");
            }
        }
    }
}

/// An auto-generated pronounceable `adjective_surname` name, retried a
/// bounded number of times against the current container table before
/// falling back to a name that is guaranteed free (the word lists give
/// ~17,000 combinations; a collision surviving several retries means the
/// daemon has an unusually large number of containers already).
impl Engine {
    fn generate_unique_name(&self) -> EngineResult<String> {
        const MAX_ATTEMPTS: u32 = 8;
        let taken: std::collections::HashSet<String> = self
            .runtime
            .store()
            .list()
            .into_iter()
            .map(|c| c.name)
            .collect();
        for _ in 0..MAX_ATTEMPTS {
            let candidate = crate::container::namesgenerator::generate();
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Ok(format!("{}-{}", crate::container::namesgenerator::generate(), Uuid::new_v4().simple()))
    }
}

/// `GET /system/df` response body.
#[derive(Debug, Serialize)]
pub struct DiskUsage {
    pub layers_bytes: u64,
    pub containers_bytes: u64,
    pub reclaimable_bytes: u64,
    pub layer_count: usize,
    pub container_count: usize,
}

fn dir_size(path: &std::path::Path) -> EngineResult<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| EngineError::Internal(e.to_string()))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| EngineError::Internal(e.to_string()))?.len();
        }
    }
    Ok(total)
}
