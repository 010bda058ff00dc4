//! Container data model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ContainerId = String;

/// Lifecycle state of a container.
///
/// Transitions are validated by [`can_transition_to`](ContainerState::can_transition_to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
}

impl ContainerState {
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused)
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ContainerState::Created | ContainerState::Exited | ContainerState::Restarting
        )
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, ContainerState::Running | ContainerState::Paused)
    }

    pub fn can_remove(&self) -> bool {
        matches!(self, ContainerState::Created | ContainerState::Exited)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn can_unpause(&self) -> bool {
        matches!(self, ContainerState::Paused)
    }

    pub fn can_transition_to(&self, target: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, target),
            (Created, Running)
                | (Created, Exited)
                | (Running, Paused)
                | (Running, Exited)
                | (Running, Restarting)
                | (Paused, Running)
                | (Paused, Exited)
                | (Restarting, Running)
                | (Restarting, Exited)
                | (Exited, Running)
        )
    }
}

/// Resource limits applied via cgroups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    pub memory_bytes: Option<i64>,
    pub cpu_shares: Option<i64>,
    pub cpuset_cpus: Option<String>,
    pub blkio_weight: Option<u16>,
}

/// Creation-time configuration, persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub exposed_ports: Vec<PortSpec>,
    pub volumes: Vec<String>,
    pub resources: Resources,
    pub tty: bool,
    pub open_stdin: bool,
    pub hostname: Option<String>,
    /// Free-form metadata returned by `inspect`/`ps`, filterable via
    /// `?filters=`.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            cmd: Vec::new(),
            entrypoint: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            exposed_ports: Vec::new(),
            volumes: Vec::new(),
            resources: Resources::default(),
            tty: false,
            open_stdin: false,
            hostname: None,
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub protocol: Protocol,
    pub container_port: u16,
}

/// A requested port binding. `host_port = 0`
/// means "pick any free port above the ephemeral floor".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub protocol: Protocol,
    pub container_port: u16,
    pub host_ip: Option<String>,
    pub host_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyKind {
    #[default]
    No,
    OnFailure,
    Always,
    UnlessStopped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub kind: RestartPolicyKind,
    pub max_retries: Option<u32>,
}

/// A bind or named volume mapping, container path -> host path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub container_path: String,
    pub host_path: String,
    pub read_only: bool,
}

/// Start-time configuration, persisted as `hostconfig.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub port_bindings: Vec<PortBinding>,
    pub binds: Vec<VolumeMount>,
    pub links: Vec<String>,
    pub dns: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub publish_all_ports: bool,
    pub network_mode: Option<String>,
}

/// Allocated network identity, set on `Start`, cleared on `exited`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub veth_name: Option<String>,
    pub published_ports: Vec<PortBinding>,
}

/// A resolved symbolic link to another container, computed at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub alias: String,
    pub target_id: ContainerId,
    pub target_ip: String,
}

pub type ExecId = String;

/// Substate of an `Exec` process, independent of the parent container's
/// own state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    Created,
    Running,
    Exited,
}

/// The command an `Exec` joins into an already-running container's
/// namespaces. No rootfs, resources, or bind mounts — those belong to the
/// container this process enters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
}

/// In-memory record of one `Exec` invocation. Not persisted across daemon
/// restarts: like the original's own exec instances, its lifetime is tied
/// to the daemon process that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSession {
    pub id: ExecId,
    pub container_id: ContainerId,
    pub config: ExecConfig,
    pub state: ExecState,
    pub pid: u32,
    pub exit_code: Option<i32>,
}

/// Full runtime record for a container, persisted as `state.json` plus the
/// config files; the on-disk JSON is authoritative across restarts
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub image_id: String,
    pub config: ContainerConfig,
    pub host_config: HostConfig,

    pub state: ContainerState,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every state transition; lets observers detect staleness.
    pub version: u64,
    pub restart_count: u32,

    pub network: NetworkEndpoint,
    pub rootfs: Option<String>,
    pub volumes: HashMap<String, String>,
    pub links: Vec<ResolvedLink>,

    /// Set while a `Remove` is in flight, blocking `Start`.
    #[serde(default)]
    pub removal_in_progress: bool,
}

impl Container {
    pub fn new(id: ContainerId, name: String, image_id: String, config: ContainerConfig) -> Self {
        Self {
            id,
            name,
            image_id,
            config,
            host_config: HostConfig::default(),
            state: ContainerState::Created,
            pid: 0,
            exit_code: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
            version: 0,
            restart_count: 0,
            network: NetworkEndpoint::default(),
            rootfs: None,
            volumes: HashMap::new(),
            links: Vec::new(),
            removal_in_progress: false,
        }
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}
