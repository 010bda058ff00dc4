//! Network driver: one host bridge, bridged veth pairs per container,
//! iptables NAT/filter rules, and host-port reservation.
//!
//! A single interface the rest of the engine programs against, with
//! exactly one implementation, [`BridgeNetworkDriver`].

mod bridge;
mod ipam;
mod iptables;
mod ports;
mod veth;

pub use ipam::IpAllocator;
pub use ports::PortTable;
pub use veth::{NetlinkClient, VethPair};

use std::os::fd::RawFd;
use std::sync::Mutex;

use async_trait::async_trait;
use keel_shared::constants::network::BRIDGE_NAME;
use keel_shared::errors::{EngineError, EngineResult};

use crate::container::types::{NetworkEndpoint, PortBinding, ResolvedLink};
use bridge::Bridge;

const DNAT_CHAIN: &str = "KEEL";

#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Allocate an endpoint for `container_id`, attach its veth end
    /// (identified by `netns_fd`, the container's net namespace fd) to the
    /// bridge, reserve published ports, and install NAT/filter rules
    ///.
    async fn attach(
        &self,
        container_id: &str,
        netns_fd: RawFd,
        published: &[PortBinding],
        links: &[ResolvedLink],
        icc_enabled: bool,
    ) -> EngineResult<NetworkEndpoint>;

    /// Tear down in reverse: remove NAT rules, remove the veth, release
    /// the IP and host ports. Idempotent; safe to call on partial state.
    async fn detach(&self, container_id: &str, endpoint: &NetworkEndpoint) -> EngineResult<()>;
}

pub struct BridgeNetworkDriver {
    netlink: NetlinkClient,
    bridge: Mutex<Option<Bridge>>,
    ports: PortTable,
}

impl BridgeNetworkDriver {
    /// Create the bridge if absent and install the baseline NAT/filter
    /// rules, then return a driver
    /// ready to attach containers.
    pub async fn boot() -> EngineResult<Self> {
        let netlink = NetlinkClient::connect()?;
        let bridge = Bridge::ensure(BRIDGE_NAME, &netlink).await?;

        let cidr = bridge.allocator.network().to_string();
        iptables::ensure_masquerade(&cidr, BRIDGE_NAME)?;
        iptables::ensure_bridge_forward_accept(BRIDGE_NAME)?;
        iptables::ensure_dnat_chain(DNAT_CHAIN)?;

        Ok(Self {
            netlink,
            bridge: Mutex::new(Some(bridge)),
            ports: PortTable::new(),
        })
    }

    fn bridge_ip(&self) -> EngineResult<std::net::Ipv4Addr> {
        let guard = self.bridge.lock().unwrap();
        let bridge = guard.as_ref().ok_or_else(|| {
            EngineError::DriverError("network driver not booted".into())
        })?;
        Ok(bridge.allocator.bridge_address())
    }
}

#[async_trait]
impl NetworkDriver for BridgeNetworkDriver {
    async fn attach(
        &self,
        container_id: &str,
        netns_fd: RawFd,
        published: &[PortBinding],
        links: &[ResolvedLink],
        icc_enabled: bool,
    ) -> EngineResult<NetworkEndpoint> {
        let (ip, prefix) = {
            let guard = self.bridge.lock().unwrap();
            let bridge = guard
                .as_ref()
                .ok_or_else(|| EngineError::DriverError("network driver not booted".into()))?;
            let ip = bridge.allocator.allocate()?;
            (ip, bridge.allocator.network().prefix())
        };

        let pair = VethPair {
            host_side: format!("veth{}", &container_id[..8.min(container_id.len())]),
            container_side: "eth0".to_string(),
        };
        self.netlink.create_veth_pair(&pair, BRIDGE_NAME, netns_fd).await?;

        let bridge_ip = self.bridge_ip()?;
        veth::configure_container_interface(netns_fd, &pair.container_side, ip, prefix, bridge_ip)?;

        let mut reserved_ports = Vec::new();
        for binding in published {
            let host_port = self.ports.reserve(binding.protocol, binding.host_port)?;
            let protocol = match binding.protocol {
                crate::container::types::Protocol::Tcp => "tcp",
                crate::container::types::Protocol::Udp => "udp",
            };
            if let Err(e) = iptables::ensure_port_dnat(
                DNAT_CHAIN,
                protocol,
                host_port,
                &ip.to_string(),
                binding.container_port,
            ) {
                self.ports.release(binding.protocol, host_port);
                return Err(e);
            }
            reserved_ports.push(PortBinding {
                protocol: binding.protocol,
                container_port: binding.container_port,
                host_ip: binding.host_ip.clone(),
                host_port,
            });
        }

        if !icc_enabled {
            iptables::deny_inter_container(BRIDGE_NAME)?;
            for link in links {
                iptables::allow_link(&ip.to_string(), &link.target_ip)?;
            }
        }

        Ok(NetworkEndpoint {
            ip_address: Some(ip.to_string()),
            mac_address: None,
            veth_name: Some(pair.host_side),
            published_ports: reserved_ports,
        })
    }

    async fn detach(&self, _container_id: &str, endpoint: &NetworkEndpoint) -> EngineResult<()> {
        for binding in &endpoint.published_ports {
            let protocol = match binding.protocol {
                crate::container::types::Protocol::Tcp => "tcp",
                crate::container::types::Protocol::Udp => "udp",
            };
            if let Some(ip) = &endpoint.ip_address {
                let _ = iptables::remove_port_dnat(
                    DNAT_CHAIN,
                    protocol,
                    binding.host_port,
                    ip,
                    binding.container_port,
                );
            }
            self.ports.release(binding.protocol, binding.host_port);
        }

        if let Some(veth_name) = &endpoint.veth_name {
            self.netlink.remove_link(veth_name).await?;
        }

        if let Some(ip) = &endpoint.ip_address {
            if let Ok(addr) = ip.parse() {
                let guard = self.bridge.lock().unwrap();
                if let Some(bridge) = guard.as_ref() {
                    bridge.allocator.release(addr);
                }
            }
        }

        Ok(())
    }
}
