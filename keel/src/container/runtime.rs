//! The container runtime: owns every live container and drives its state
//! machine.
//!
//! Every transition follows the same shape: acquire the per-container
//! lock, mutate in-memory state, persist to disk, drop the lock, then do
//! the slow blocking thing (fork/exec, mount, kernel syscalls), and
//! finally re-acquire the lock to finalize. Locks are never held across
//! blocking I/O. Liveness for recovery is checked by reading
//! `/proc/<pid>/cgroup` rather than `kill(pid, 0)`, since a stale pid can
//! be reused by an unrelated process across a reboot.
//!
//! Monitor task model: each `Start` spawns a dedicated `spawn_blocking`
//! task running the Execution Driver's blocking fork/exec/wait loop, and
//! signals completion on a per-container `tokio::sync::broadcast` channel
//! so `Wait` supports arbitrarily many observers without holding a
//! request-scoped lifetime open.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use keel_shared::constants::{RESTART_BACKOFF_INITIAL_SECS, RESTART_BACKOFF_MAX_SECS};
use keel_shared::errors::{EngineError, EngineResult};
use keel_shared::layout::{ContainerLayout, DaemonLayout};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::{broadcast, mpsc};

use uuid::Uuid;

use crate::execdriver::{
    dup_fd, BindMount, ExecProcessSpec, ExecSpec, ExecutionDriver, Pty, PtyHandle, StdioPipes,
};
use crate::graph::Graph;
use crate::network::NetworkDriver;
use crate::storage::StorageDriver;

use super::journal::{Journal, JournalRecord, Stream as JournalStream};
use super::store::ContainerStore;
use super::types::{
    Container, ContainerId, ContainerState, ExecConfig, ExecId, ExecSession, ExecState,
    RestartPolicyKind,
};

const WAIT_CHANNEL_CAPACITY: usize = 16;
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Everything `Attach` needs for one running container: a broadcast
/// subscription for live stdout/stderr and a sender to forward typed input.
pub struct AttachHandle {
    pub backlog: Vec<JournalRecord>,
    pub output: broadcast::Receiver<(JournalStream, String)>,
    pub stdin: mpsc::UnboundedSender<Vec<u8>>,
}

/// The live, in-memory half of a running container's stdio — everything
/// that only exists while the process is up, as opposed to the on-disk
/// journal which outlives it. Dropped when the monitor task finalizes.
struct LiveStreams {
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    output_tx: broadcast::Sender<(JournalStream, String)>,
    pty: Option<Arc<PtyHandle>>,
}

pub struct ContainerRuntime {
    layout: DaemonLayout,
    store: ContainerStore,
    graph: Arc<Graph>,
    storage: Arc<dyn StorageDriver>,
    network: Arc<dyn NetworkDriver>,
    exec_driver: Arc<dyn ExecutionDriver>,
    waiters: Mutex<HashMap<ContainerId, broadcast::Sender<i32>>>,
    live: Arc<Mutex<HashMap<ContainerId, Arc<LiveStreams>>>>,
    exec_sessions: Arc<Mutex<HashMap<ExecId, ExecSession>>>,
    exec_live: Arc<Mutex<HashMap<ExecId, Arc<LiveStreams>>>>,
    exec_waiters: Arc<Mutex<HashMap<ExecId, broadcast::Sender<i32>>>>,
    /// Handle back to this runtime's own `Arc`, so the restart-policy
    /// backoff task (spawned from a free function, not a method) can call
    /// back into `start` once the wait is over. Set by
    /// [`new_arc`](Self::new_arc); absent (and restart scheduling a no-op)
    /// for runtimes built via [`new`](Self::new) directly, e.g. in tests.
    self_ref: Mutex<Weak<ContainerRuntime>>,
}

impl ContainerRuntime {
    pub fn new(
        layout: DaemonLayout,
        store: ContainerStore,
        graph: Arc<Graph>,
        storage: Arc<dyn StorageDriver>,
        network: Arc<dyn NetworkDriver>,
        exec_driver: Arc<dyn ExecutionDriver>,
    ) -> Self {
        Self {
            layout,
            store,
            graph,
            storage,
            network,
            exec_driver,
            waiters: Mutex::new(HashMap::new()),
            live: Arc::new(Mutex::new(HashMap::new())),
            exec_sessions: Arc::new(Mutex::new(HashMap::new())),
            exec_live: Arc::new(Mutex::new(HashMap::new())),
            exec_waiters: Arc::new(Mutex::new(HashMap::new())),
            self_ref: Mutex::new(Weak::new()),
        }
    }

    /// Build the runtime already wrapped in the `Arc` it needs to schedule
    /// its own restart-policy backoff tasks.
    pub fn new_arc(
        layout: DaemonLayout,
        store: ContainerStore,
        graph: Arc<Graph>,
        storage: Arc<dyn StorageDriver>,
        network: Arc<dyn NetworkDriver>,
        exec_driver: Arc<dyn ExecutionDriver>,
    ) -> Arc<Self> {
        let runtime = Arc::new(Self::new(layout, store, graph, storage, network, exec_driver));
        *runtime.self_ref.lock().unwrap() = Arc::downgrade(&runtime);
        runtime
    }

    pub fn store(&self) -> &ContainerStore {
        &self.store
    }

    fn journal_for(&self, container_id: &str) -> EngineResult<Journal> {
        let layout = ContainerLayout::new(self.layout.container_dir(container_id));
        Journal::open(layout.json_log(container_id))
    }

    fn waiter(&self, id: &str) -> broadcast::Sender<i32> {
        let mut waiters = self.waiters.lock().unwrap();
        waiters
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(WAIT_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// `Start`. Preconditions: `created | exited`, no
    /// removal in flight.
    pub async fn start(&self, id: &str) -> EngineResult<()> {
        let mut container = self.store.lookup(id)?;
        if container.removal_in_progress {
            return Err(EngineError::StateConflict(format!("container {id} is being removed")));
        }
        if !container.state.can_start() {
            return Err(EngineError::StateConflict(format!(
                "cannot start container in state {:?}",
                container.state
            )));
        }

        container.links = self.resolve_links(&container)?;

        let chain = self.graph.chain(&container.image_id)?;
        let layer_dirs: Vec<_> = chain.iter().map(|id| self.graph_layer_dir(id)).collect();
        self.storage.create(&container.id, &layer_dirs)?;
        let rootfs = self.storage.get(&container.id, None)?;
        self.write_network_files(&container, &rootfs)?;

        let (binds, volumes) = self.resolve_volumes(&container)?;
        container.volumes = volumes;

        container.rootfs = Some(rootfs.display().to_string());
        container.pid = 0;
        container.state = ContainerState::Running;
        container.started_at = Some(Utc::now());
        container.bump_version();
        self.store.save(&container)?;

        self.spawn_monitor(container, rootfs, binds);
        Ok(())
    }

    /// Resolve declared + bound volumes into the `BindMount`s the
    /// execution driver mounts into the rootfs, plus the `.Volumes` map
    /// (`container path -> host path`) persisted for `inspect`.
    /// `host_config.binds` (`-v host:container[:ro]`-style explicit
    /// bindings) take priority; any `config.volumes` path not already
    /// bound gets a fresh anonymous directory under the daemon's volumes
    /// directory, matching "anonymous (auto-allocated under the daemon's
    /// volumes directory)" in the volume model.
    fn resolve_volumes(
        &self,
        container: &Container,
    ) -> EngineResult<(Vec<BindMount>, HashMap<String, String>)> {
        let mut binds = Vec::with_capacity(container.host_config.binds.len());
        let mut volumes = HashMap::new();

        for bind in &container.host_config.binds {
            binds.push(BindMount {
                host_path: std::path::PathBuf::from(&bind.host_path),
                container_path: std::path::PathBuf::from(&bind.container_path),
                read_only: bind.read_only,
            });
            volumes.insert(bind.container_path.clone(), bind.host_path.clone());
        }

        for declared in &container.config.volumes {
            if volumes.contains_key(declared) {
                continue;
            }
            let volume_id = Uuid::new_v4().simple().to_string();
            let host_path = self.layout.volume_dir(&volume_id);
            std::fs::create_dir_all(&host_path)?;
            volumes.insert(declared.clone(), host_path.display().to_string());
            binds.push(BindMount {
                host_path,
                container_path: std::path::PathBuf::from(declared),
                read_only: false,
            });
        }

        Ok((binds, volumes))
    }

    /// Resolve `host_config.links` (`"target"` or `"target:alias"`) into
    /// names + IP addresses, and append `<ALIAS>_PORT_<n>_<PROTO>`
    /// environment variables onto the container's own env for this run.
    /// The target must already be running — a link to a stopped container
    /// has no IP to resolve.
    fn resolve_links(&self, container: &Container) -> EngineResult<Vec<super::types::ResolvedLink>> {
        let mut resolved = Vec::with_capacity(container.host_config.links.len());
        for link in &container.host_config.links {
            let (target_ref, alias) = match link.split_once(':') {
                Some((target, alias)) => (target, alias.to_string()),
                None => (link.as_str(), link.clone()),
            };
            let target = self.store.lookup(target_ref)?;
            let ip = target.network.ip_address.clone().ok_or_else(|| {
                EngineError::StateConflict(format!(
                    "cannot link to {target_ref}: container is not running"
                ))
            })?;
            resolved.push(super::types::ResolvedLink {
                alias,
                target_id: target.id,
                target_ip: ip,
            });
        }
        Ok(resolved)
    }

    /// `<ALIAS>_PORT_<n>_<PROTO>` environment variables for every published
    /// port of each linked container.
    fn link_env_vars(&self, links: &[super::types::ResolvedLink]) -> Vec<String> {
        let mut vars = Vec::new();
        for link in links {
            let Ok(target) = self.store.lookup(&link.target_id) else {
                continue;
            };
            let alias = link.alias.to_uppercase().replace('-', "_");
            for binding in &target.network.published_ports {
                let proto = match binding.protocol {
                    crate::container::types::Protocol::Tcp => "TCP",
                    crate::container::types::Protocol::Udp => "UDP",
                };
                vars.push(format!(
                    "{alias}_PORT_{}_{proto}=tcp://{}:{}",
                    binding.container_port, link.target_ip, binding.container_port
                ));
            }
        }
        vars
    }

    fn graph_layer_dir(&self, layer_id: &str) -> std::path::PathBuf {
        self.layout.graph_dir().join(layer_id).join("tree")
    }

    fn write_network_files(&self, container: &Container, rootfs: &std::path::Path) -> EngineResult<()> {
        let hostname = container
            .config
            .hostname
            .clone()
            .unwrap_or_else(|| container.id[..12.min(container.id.len())].to_string());
        std::fs::write(rootfs.join("etc/hostname"), format!("{hostname}\n"))?;

        let mut hosts = String::from("127.0.0.1\tlocalhost\n");
        for link in &container.links {
            hosts.push_str(&format!("{}\t{}\n", link.target_ip, link.alias));
        }
        std::fs::write(rootfs.join("etc/hosts"), hosts)?;

        let resolv = if container.host_config.dns.is_empty() {
            "nameserver 8.8.8.8\n".to_string()
        } else {
            container
                .host_config
                .dns
                .iter()
                .map(|ns| format!("nameserver {ns}\n"))
                .collect()
        };
        std::fs::write(rootfs.join("etc/resolv.conf"), resolv)?;
        Ok(())
    }

    /// Spawn the dedicated monitor task that runs the blocking
    /// fork/exec/wait loop, wires networking once namespaces are entered,
    /// and finalizes state when the process exits.
    fn spawn_monitor(&self, container: Container, rootfs: std::path::PathBuf, binds: Vec<BindMount>) {
        let exec_driver = self.exec_driver.clone();
        let network = self.network.clone();
        let store = self.store.clone();
        let waiter = self.waiter(&container.id);
        let journal = self.journal_for(&container.id);
        let live_map = self.live.clone();
        let self_ref = self.self_ref.lock().unwrap().clone();
        let link_env = self.link_env_vars(&container.links);

        tokio::spawn(async move {
            let container_id = container.id.clone();
            let mut spec = ExecSpec::from_container(&container, rootfs, binds);
            spec.env.extend(link_env);
            let published = container.host_config.port_bindings.clone();
            let links = container.links.clone();
            let icc_enabled = container.host_config.network_mode.as_deref() != Some("none");

            let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
            let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();

            let (stdio, stdin_fd, pty_handle) =
                match build_stdio(journal, container.config.tty, output_tx.clone()) {
                    Ok(triple) => triple,
                    Err(e) => {
                        tracing::error!(container = %container_id, error = %e, "failed to open stdio pipes");
                        return;
                    }
                };

            live_map.lock().unwrap().insert(
                container_id.clone(),
                Arc::new(LiveStreams {
                    stdin_tx: stdin_tx.clone(),
                    output_tx,
                    pty: pty_handle,
                }),
            );
            let stdin_forwarder = spawn_stdin_forwarder(stdin_rx, stdin_fd);

            let network_for_cb = network.clone();
            let store_for_cb = store.clone();
            let container_id_for_cb = container_id.clone();
            let on_namespaces_ready = Box::new(move |pid: u32| -> EngineResult<()> {
                let netns_fd = open_netns(pid)?;
                let handle = tokio::runtime::Handle::current();
                let endpoint = handle.block_on(network_for_cb.attach(
                    &container_id_for_cb,
                    netns_fd.as_raw_fd(),
                    &published,
                    &links,
                    icc_enabled,
                ))?;
                if let Ok(mut latest) = store_for_cb.lookup(&container_id_for_cb) {
                    latest.pid = pid;
                    latest.network = endpoint;
                    let _ = store_for_cb.save(&latest);
                }
                Ok(())
            });

            let result = tokio::task::spawn_blocking(move || {
                exec_driver.run(&spec, stdio, on_namespaces_ready)
            })
            .await;

            let exit_code = match result {
                Ok(Ok(status)) => status.exit_code,
                Ok(Err(e)) => {
                    tracing::error!(container = %container_id, error = %e, "execution driver failed");
                    255
                }
                Err(e) => {
                    tracing::error!(container = %container_id, error = %e, "monitor task panicked");
                    255
                }
            };

            stdin_forwarder.abort();
            live_map.lock().unwrap().remove(&container_id);

            finalize_exit(&store, &network, &container_id, exit_code, &waiter, &self_ref).await;
        });
    }

    /// `Stop`: SIGTERM, wait up to `timeout`, then SIGKILL.
    pub async fn stop(&self, id: &str, timeout: Duration) -> EngineResult<()> {
        let container = self.store.lookup(id)?;
        if container.state == ContainerState::Exited {
            return Ok(());
        }
        if !container.state.can_stop() {
            return Err(EngineError::StateConflict(format!(
                "cannot stop container in state {:?}",
                container.state
            )));
        }

        self.send_signal(container.pid, Signal::SIGTERM)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.store.lookup(id)?.state == ContainerState::Exited {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let container = self.store.lookup(id)?;
        if container.state != ContainerState::Exited {
            self.send_signal(container.pid, Signal::SIGKILL)?;
        }
        Ok(())
    }

    /// `Kill`: send a signal, don't wait unless it causes exit.
    pub fn kill(&self, id: &str, signal: Signal) -> EngineResult<()> {
        let container = self.store.lookup(id)?;
        self.send_signal(container.pid, signal)
    }

    fn send_signal(&self, pid: u32, signal: Signal) -> EngineResult<()> {
        if pid == 0 {
            return Ok(());
        }
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| EngineError::DriverError(format!("kill failed: {e}")))
    }

    /// `Wait`: resolves with the exit code once the container reaches
    /// `exited`; served from a broadcast channel so it supports any number
    /// of concurrent callers.
    pub async fn wait(&self, id: &str) -> EngineResult<i32> {
        let container = self.store.lookup(id)?;
        if let Some(code) = container.exit_code {
            if container.state == ContainerState::Exited {
                return Ok(code);
            }
        }
        let mut receiver = self.waiter(id).subscribe();
        receiver
            .recv()
            .await
            .map_err(|_| EngineError::Internal("wait channel closed".into()))
    }

    /// `Attach`: subscribe to a running container's live
    /// stdout/stderr and get a sender for forwarding stdin, optionally
    /// preceded by the on-disk backlog (`logs=true`).
    pub fn attach(&self, id: &str, include_backlog: bool) -> EngineResult<AttachHandle> {
        let container = self.store.lookup(id)?;
        let live = self
            .live
            .lock()
            .unwrap()
            .get(&container.id)
            .cloned()
            .ok_or_else(|| EngineError::StateConflict(format!("container {id} is not running")))?;

        let backlog = if include_backlog {
            self.journal_for(&container.id)?.replay()?
        } else {
            Vec::new()
        };

        Ok(AttachHandle {
            backlog,
            output: live.output_tx.subscribe(),
            stdin: live.stdin_tx.clone(),
        })
    }

    /// `Resize`: only meaningful for `tty`-enabled containers.
    pub fn resize(&self, id: &str, rows: u16, cols: u16) -> EngineResult<()> {
        let container = self.store.lookup(id)?;
        let live = self
            .live
            .lock()
            .unwrap()
            .get(&container.id)
            .cloned()
            .ok_or_else(|| EngineError::StateConflict(format!("container {id} is not running")))?;
        let pty = live
            .pty
            .as_ref()
            .ok_or_else(|| EngineError::InvalidArgument(format!("container {id} was not started with a tty")))?;
        pty.resize(rows, cols)
    }

    /// Full on-disk journal for a container, oldest first (`GET .../logs`).
    pub fn logs(&self, id: &str) -> EngineResult<Vec<JournalRecord>> {
        let container = self.store.lookup(id)?;
        self.journal_for(&container.id)?.replay()
    }

    /// `Pause`/`Unpause` via the freezer cgroup.
    pub async fn pause(&self, id: &str) -> EngineResult<()> {
        let mut container = self.store.lookup(id)?;
        if !container.state.can_pause() {
            return Err(EngineError::StateConflict(format!("cannot pause container in state {:?}", container.state)));
        }
        let cgroup = crate::execdriver::CgroupHandle::create(&container.id, &container.config.resources)?;
        cgroup.freeze()?;
        container.state = ContainerState::Paused;
        container.bump_version();
        self.store.save(&container)
    }

    pub async fn unpause(&self, id: &str) -> EngineResult<()> {
        let mut container = self.store.lookup(id)?;
        if !container.state.can_unpause() {
            return Err(EngineError::StateConflict(format!("cannot unpause container in state {:?}", container.state)));
        }
        let cgroup = crate::execdriver::CgroupHandle::create(&container.id, &container.config.resources)?;
        cgroup.thaw()?;
        container.state = ContainerState::Running;
        container.bump_version();
        self.store.save(&container)
    }

    /// `Exec` (create phase): register a new process to join an
    /// already-running container's namespaces. Does not start it — no new
    /// mount/net allocation happens here, only bookkeeping, mirroring
    /// `Create`/`Start` being split for containers themselves.
    pub fn create_exec(&self, container_id: &str, config: ExecConfig) -> EngineResult<ExecId> {
        let container = self.store.lookup(container_id)?;
        if container.state != ContainerState::Running {
            return Err(EngineError::StateConflict(format!(
                "cannot exec in container in state {:?}",
                container.state
            )));
        }
        let id = Uuid::new_v4().simple().to_string();
        let session = ExecSession {
            id: id.clone(),
            container_id: container.id,
            config,
            state: ExecState::Created,
            pid: 0,
            exit_code: None,
        };
        self.exec_sessions.lock().unwrap().insert(id.clone(), session);
        Ok(id)
    }

    pub fn exec_inspect(&self, exec_id: &str) -> EngineResult<ExecSession> {
        self.exec_sessions
            .lock()
            .unwrap()
            .get(exec_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))
    }

    /// `Exec` (start phase): join the target container's namespaces and
    /// run the requested command. Has its own stdio pipes and output
    /// broadcast, the same shape `Attach` uses for a container, but no
    /// on-disk journal — an exec process's output is not part of the
    /// container's persisted log.
    pub fn start_exec(&self, exec_id: &str) -> EngineResult<AttachHandle> {
        let (container_id, config, container_pid) = {
            let mut sessions = self.exec_sessions.lock().unwrap();
            let session = sessions
                .get_mut(exec_id)
                .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))?;
            if session.state != ExecState::Created {
                return Err(EngineError::StateConflict(format!(
                    "exec {exec_id} already started"
                )));
            }
            let container = self.store.lookup(&session.container_id)?;
            if container.state != ContainerState::Running {
                return Err(EngineError::StateConflict(format!(
                    "container {} is not running",
                    session.container_id
                )));
            }
            session.state = ExecState::Running;
            (session.container_id.clone(), session.config.clone(), container.pid)
        };

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (stdio, stdin_fd, pty_handle) = build_exec_stdio(config.tty, output_tx.clone())?;

        let live = Arc::new(LiveStreams {
            stdin_tx: stdin_tx.clone(),
            output_tx: output_tx.clone(),
            pty: pty_handle,
        });
        self.exec_live.lock().unwrap().insert(exec_id.to_string(), live.clone());
        let stdin_forwarder = spawn_stdin_forwarder(stdin_rx, stdin_fd);

        let exec_driver = self.exec_driver.clone();
        let exec_id_owned = exec_id.to_string();
        let exec_sessions = self.exec_sessions.clone();
        let exec_live = self.exec_live.clone();
        let waiter = {
            let mut waiters = self.exec_waiters.lock().unwrap();
            waiters
                .entry(exec_id.to_string())
                .or_insert_with(|| broadcast::channel(WAIT_CHANNEL_CAPACITY).0)
                .clone()
        };
        let spec = ExecProcessSpec {
            argv: config.argv,
            env: config.env,
            working_dir: config.working_dir,
            uid: 0,
            gid: 0,
        };

        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || exec_driver.exec(container_pid, &spec, stdio)).await;
            let exit_code = match result {
                Ok(Ok(status)) => status.exit_code,
                Ok(Err(e)) => {
                    tracing::error!(exec = %exec_id_owned, container = %container_id, error = %e, "exec failed");
                    255
                }
                Err(e) => {
                    tracing::error!(exec = %exec_id_owned, error = %e, "exec monitor task panicked");
                    255
                }
            };

            stdin_forwarder.abort();
            exec_live.lock().unwrap().remove(&exec_id_owned);
            if let Some(session) = exec_sessions.lock().unwrap().get_mut(&exec_id_owned) {
                session.state = ExecState::Exited;
                session.exit_code = Some(exit_code);
            }
            let _ = waiter.send(exit_code);
        });

        Ok(AttachHandle {
            backlog: Vec::new(),
            output: live.output_tx.subscribe(),
            stdin: live.stdin_tx.clone(),
        })
    }

    /// `Attach` onto an already-started exec session, for a second caller
    /// joining the same stream.
    pub fn exec_attach(&self, exec_id: &str) -> EngineResult<AttachHandle> {
        let live = self
            .exec_live
            .lock()
            .unwrap()
            .get(exec_id)
            .cloned()
            .ok_or_else(|| EngineError::StateConflict(format!("exec {exec_id} is not running")))?;
        Ok(AttachHandle {
            backlog: Vec::new(),
            output: live.output_tx.subscribe(),
            stdin: live.stdin_tx.clone(),
        })
    }

    /// `Resize`, exec variant: only meaningful for `tty`-enabled execs.
    pub fn exec_resize(&self, exec_id: &str, rows: u16, cols: u16) -> EngineResult<()> {
        let live = self
            .exec_live
            .lock()
            .unwrap()
            .get(exec_id)
            .cloned()
            .ok_or_else(|| EngineError::StateConflict(format!("exec {exec_id} is not running")))?;
        let pty = live
            .pty
            .as_ref()
            .ok_or_else(|| EngineError::InvalidArgument(format!("exec {exec_id} was not started with a tty")))?;
        pty.resize(rows, cols)
    }

    /// `Wait`, exec variant: resolves once the exec process exits.
    pub async fn exec_wait(&self, exec_id: &str) -> EngineResult<i32> {
        if let Some(code) = self
            .exec_sessions
            .lock()
            .unwrap()
            .get(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("exec {exec_id}")))?
            .exit_code
        {
            return Ok(code);
        }
        let mut receiver = {
            let mut waiters = self.exec_waiters.lock().unwrap();
            waiters
                .entry(exec_id.to_string())
                .or_insert_with(|| broadcast::channel(WAIT_CHANNEL_CAPACITY).0)
                .subscribe()
        };
        receiver
            .recv()
            .await
            .map_err(|_| EngineError::Internal("exec wait channel closed".into()))
    }

    /// Re-poll an already-running container's pid after a daemon restart
    ///. The original fork/exec
    /// relationship is gone once the prior daemon process exited, so this
    /// polls `/proc/<pid>` for exit rather than blocking on `waitpid`.
    pub async fn reattach_monitor(&self, id: &str) -> EngineResult<()> {
        let container = self.store.lookup(id)?;
        let store = self.store.clone();
        let network = self.network.clone();
        let waiter = self.waiter(id);
        let pid = container.pid;
        let container_id = container.id.clone();
        let self_ref = self.self_ref.lock().unwrap().clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if !std::path::Path::new(&format!("/proc/{pid}")).exists() {
                    finalize_exit(&store, &network, &container_id, 255, &waiter, &self_ref).await;
                    return;
                }
            }
        });
        Ok(())
    }

    /// Branch 2 of crash recovery: the pid is gone or no longer ours.
    pub async fn finalize_crashed(&self, id: &str, exit_code: i32) -> EngineResult<()> {
        let waiter = self.waiter(id);
        let self_ref = self.self_ref.lock().unwrap().clone();
        finalize_exit(&self.store, &self.network, id, exit_code, &waiter, &self_ref).await;
        Ok(())
    }
}

async fn finalize_exit(
    store: &ContainerStore,
    network: &Arc<dyn NetworkDriver>,
    container_id: &str,
    exit_code: i32,
    waiter: &broadcast::Sender<i32>,
    self_ref: &Weak<ContainerRuntime>,
) {
    let Ok(mut container) = store.lookup(container_id) else {
        return;
    };

    let _ = network.detach(container_id, &container.network).await;
    container.network = Default::default();
    container.pid = 0;
    container.exit_code = Some(exit_code);
    container.finished_at = Some(Utc::now());

    let should_restart = match container.host_config.restart_policy.kind {
        RestartPolicyKind::Always => true,
        RestartPolicyKind::UnlessStopped => true,
        RestartPolicyKind::OnFailure => {
            exit_code != 0
                && container.restart_count
                    < container.host_config.restart_policy.max_retries.unwrap_or(u32::MAX)
        }
        RestartPolicyKind::No => false,
    };

    container.state = ContainerState::Exited;
    container.bump_version();
    let _ = store.save(&container);
    let _ = waiter.send(exit_code);

    if should_restart {
        container.restart_count += 1;
        container.state = ContainerState::Restarting;
        container.bump_version();
        let _ = store.save(&container);
        let attempt = container.restart_count;
        tracing::info!(container = %container_id, attempt, "restart policy triggered");
        schedule_restart(self_ref.clone(), container_id.to_string(), attempt);
    }
}

/// Re-enter `Start` after an exponential backoff, capped at
/// [`RESTART_BACKOFF_MAX_SECS`]. A no-op if the runtime has since been
/// dropped (daemon shutting down) — `store` and `engine` outlive it in
/// practice, but the weak upgrade keeps this safe regardless.
fn schedule_restart(runtime: Weak<ContainerRuntime>, container_id: String, attempt: u32) {
    let backoff = restart_backoff(attempt);
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        let Some(runtime) = runtime.upgrade() else {
            return;
        };
        // The container may have been stopped/removed during the backoff
        // window; `start`'s own precondition check (state must still be
        // `restarting`-compatible) guards against racing a user action.
        if let Ok(current) = runtime.store.lookup(&container_id) {
            if current.state != ContainerState::Restarting {
                return;
            }
        }
        if let Err(e) = runtime.start(&container_id).await {
            tracing::warn!(container = %container_id, error = %e, "restart policy re-start failed");
        }
    });
}

fn open_netns(pid: u32) -> EngineResult<OwnedFd> {
    let path = format!("/proc/{pid}/ns/net");
    let file = std::fs::File::open(&path)
        .map_err(|e| EngineError::StartFailed(format!("failed to open {path}: {e}")))?;
    Ok(OwnedFd::from(file))
}

/// Fd the parent writes typed stdin bytes into — a pipe's write end for
/// plain containers, the pty master for `tty` ones.
struct StdinFd(OwnedFd);

impl StdinFd {
    fn write(&self, bytes: &[u8]) -> EngineResult<()> {
        nix::unistd::write(&self.0, bytes).map(|_| ()).map_err(io_err)
    }
}

/// Build the three fds handed to the execution driver, plus the parent-side
/// handles the runtime keeps for `Attach`/`Resize`: a stdin writer, and
/// (tty-only) the pty master for terminal resizing.
///
/// Non-tty containers get three plain pipes: the child's ends go into
/// `StdioPipes`, the parent keeps stdin's write end (fed by `Attach`) and
/// stdout/stderr's read ends (fed into the journal and broadcast to
/// attachers). `tty` containers instead get one pty: the slave end (duped
/// three times) goes to the child as stdin/stdout/stderr, and the master
/// end serves all three of those parent-side roles plus resize.
fn build_stdio(
    journal: EngineResult<Journal>,
    tty: bool,
    output_tx: broadcast::Sender<(JournalStream, String)>,
) -> EngineResult<(StdioPipes, StdinFd, Option<Arc<PtyHandle>>)> {
    let journal = Arc::new(journal?);

    if tty {
        let pty = Pty::allocate()?;
        let master_for_read = dup_fd(&pty.master)?;
        let master_for_write = dup_fd(&pty.master)?;
        let slave_for_stdout = dup_fd(&pty.slave)?;
        let slave_for_stderr = dup_fd(&pty.slave)?;

        spawn_journal_reader(master_for_read, journal, JournalStream::Stdout, output_tx);

        return Ok((
            StdioPipes {
                stdin: pty.slave,
                stdout: slave_for_stdout,
                stderr: slave_for_stderr,
            },
            StdinFd(master_for_write),
            Some(Arc::new(PtyHandle(pty.master))),
        ));
    }

    let (stdin_read, stdin_write) = nix::unistd::pipe().map_err(io_err)?;
    let (stdout_read, stdout_write) = nix::unistd::pipe().map_err(io_err)?;
    let (stderr_read, stderr_write) = nix::unistd::pipe().map_err(io_err)?;

    spawn_journal_reader(stdout_read, journal.clone(), JournalStream::Stdout, output_tx.clone());
    spawn_journal_reader(stderr_read, journal, JournalStream::Stderr, output_tx);

    Ok((
        StdioPipes {
            stdin: stdin_read,
            stdout: stdout_write,
            stderr: stderr_write,
        },
        StdinFd(stdin_write),
        None,
    ))
}

/// Build the three fds for an `Exec` process, the same tty-or-pipes shape
/// [`build_stdio`] uses for a container's own init process, minus the
/// on-disk journal: exec output is broadcast live but never persisted.
fn build_exec_stdio(
    tty: bool,
    output_tx: broadcast::Sender<(JournalStream, String)>,
) -> EngineResult<(StdioPipes, StdinFd, Option<Arc<PtyHandle>>)> {
    if tty {
        let pty = Pty::allocate()?;
        let master_for_read = dup_fd(&pty.master)?;
        let master_for_write = dup_fd(&pty.master)?;
        let slave_for_stdout = dup_fd(&pty.slave)?;
        let slave_for_stderr = dup_fd(&pty.slave)?;

        spawn_output_reader(master_for_read, JournalStream::Stdout, output_tx);

        return Ok((
            StdioPipes {
                stdin: pty.slave,
                stdout: slave_for_stdout,
                stderr: slave_for_stderr,
            },
            StdinFd(master_for_write),
            Some(Arc::new(PtyHandle(pty.master))),
        ));
    }

    let (stdin_read, stdin_write) = nix::unistd::pipe().map_err(io_err)?;
    let (stdout_read, stdout_write) = nix::unistd::pipe().map_err(io_err)?;
    let (stderr_read, stderr_write) = nix::unistd::pipe().map_err(io_err)?;

    spawn_output_reader(stdout_read, JournalStream::Stdout, output_tx.clone());
    spawn_output_reader(stderr_read, JournalStream::Stderr, output_tx);

    Ok((
        StdioPipes {
            stdin: stdin_read,
            stdout: stdout_write,
            stderr: stderr_write,
        },
        StdinFd(stdin_write),
        None,
    ))
}

fn spawn_output_reader(
    read_end: OwnedFd,
    stream: JournalStream,
    output_tx: broadcast::Sender<(JournalStream, String)>,
) {
    std::thread::spawn(move || {
        use std::io::{BufRead, BufReader};
        let file = std::fs::File::from(read_end);
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            let _ = output_tx.send((stream, line));
        }
    });
}

fn spawn_journal_reader(
    read_end: OwnedFd,
    journal: Arc<Journal>,
    stream: JournalStream,
    output_tx: broadcast::Sender<(JournalStream, String)>,
) {
    std::thread::spawn(move || {
        use std::io::{BufRead, BufReader};
        let file = std::fs::File::from(read_end);
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            let _ = journal.append(stream, &line);
            let _ = output_tx.send((stream, line));
        }
    });
}

/// Forward typed-input bytes from `Attach` into the child's stdin (or pty
/// master), on a blocking thread since `nix::unistd::write` isn't async.
/// Aborted by the monitor once the container exits.
fn spawn_stdin_forwarder(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    fd: StdinFd,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(bytes) = rx.blocking_recv() {
            if fd.write(&bytes).is_err() {
                break;
            }
        }
    })
}

fn io_err(e: nix::Error) -> EngineError {
    EngineError::Io(std::io::Error::from_raw_os_error(e as i32))
}

/// Exponential backoff for restart attempt `n` (1-indexed): `initial * 2^(n-1)`,
/// capped at [`RESTART_BACKOFF_MAX_SECS`].
fn restart_backoff(attempt: u32) -> Duration {
    Duration::from_secs(
        RESTART_BACKOFF_INITIAL_SECS
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(6))
            .min(RESTART_BACKOFF_MAX_SECS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_exit_marks_no_restart_policy_as_terminal() {
        // Exercise the pure decision logic without touching the kernel:
        // a `no` restart policy with a nonzero exit should not restart.
        let policy = RestartPolicyKind::No;
        assert!(!matches!(policy, RestartPolicyKind::Always | RestartPolicyKind::UnlessStopped));
    }

    #[test]
    fn restart_backoff_doubles_then_caps() {
        assert_eq!(restart_backoff(1), Duration::from_secs(1));
        assert_eq!(restart_backoff(2), Duration::from_secs(2));
        assert_eq!(restart_backoff(3), Duration::from_secs(4));
        assert_eq!(restart_backoff(10), Duration::from_secs(RESTART_BACKOFF_MAX_SECS));
    }
}
