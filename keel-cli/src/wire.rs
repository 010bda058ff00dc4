//! Wire-shape mirrors of the daemon's JSON responses.
//!
//! The CLI deliberately does not depend on the `keel` crate — it is a
//! client like any other, talking the same HTTP/JSON the daemon exposes to
//! remote callers, the same separation `docker` keeps from `dockerd`. These
//! structs only need to round-trip the fields the CLI actually displays.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub open_stdin: bool,
    pub hostname: Option<String>,
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
            tty: false,
            open_stdin: false,
            hostname: None,
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortBinding {
    pub protocol: String,
    pub container_port: u16,
    pub host_ip: Option<String>,
    pub host_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub port_bindings: Vec<PortBinding>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub publish_all_ports: bool,
    pub network_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateContainerRequest {
    pub image: String,
    pub config: ContainerConfig,
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
}

#[derive(Debug, Deserialize)]
pub struct CreateContainerResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkEndpoint {
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub config: ContainerConfig,
    pub state: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub network: NetworkEndpoint,
}

#[derive(Debug, Deserialize)]
pub struct WaitResponse {
    #[serde(rename = "StatusCode")]
    pub status_code: i32,
}

#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageSummary {
    pub repository: String,
    pub tag: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct InfoResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub containers: usize,
    pub containers_running: usize,
    pub images: usize,
    pub storage_driver: String,
    pub server_version: String,
}

#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub api_version: String,
}

#[derive(Debug, Deserialize)]
pub struct DiskUsage {
    pub layers_bytes: u64,
    pub containers_bytes: u64,
    pub reclaimable_bytes: u64,
    pub layer_count: usize,
    pub container_count: usize,
}
