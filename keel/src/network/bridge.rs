//! Single host-wide bridge setup: created once on daemon
//! boot if absent, with a CIDR probed from RFC1918 ranges not already in
//! use on the host.

use ipnetwork::Ipv4Network;
use keel_shared::constants::network::CANDIDATE_CIDRS;
use keel_shared::errors::{EngineError, EngineResult};

use super::ipam::IpAllocator;
use super::veth::NetlinkClient;

pub struct Bridge {
    pub name: String,
    pub allocator: IpAllocator,
}

impl Bridge {
    /// Create the bridge if it doesn't already exist, probing
    /// [`CANDIDATE_CIDRS`] in order for one that doesn't collide with an
    /// existing host interface, and enable IPv4 forwarding.
    pub async fn ensure(name: &str, netlink: &NetlinkClient) -> EngineResult<Self> {
        netlink.ensure_bridge(name).await?;

        let cidr = pick_free_cidr(name)?;
        let allocator = IpAllocator::new(cidr);
        netlink.add_addr(name, allocator.bridge_address(), cidr.prefix()).await?;
        netlink.set_link_up(name).await?;
        enable_ip_forward()?;

        Ok(Self {
            name: name.to_string(),
            allocator,
        })
    }
}

/// Probe [`CANDIDATE_CIDRS`] in order; "first free wins" against the
/// interfaces currently visible on the host.
fn pick_free_cidr(_bridge_name: &str) -> EngineResult<Ipv4Network> {
    let host_networks = host_interface_networks();
    for candidate in CANDIDATE_CIDRS {
        let network: Ipv4Network = candidate
            .parse()
            .map_err(|e| EngineError::Internal(format!("invalid candidate CIDR {candidate}: {e}")))?;
        if !host_networks.iter().any(|existing| overlaps(existing, &network)) {
            return Ok(network);
        }
    }
    Err(EngineError::DriverError(
        "no free RFC1918 range available for the bridge".into(),
    ))
}

fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn host_interface_networks() -> Vec<Ipv4Network> {
    let Ok(interfaces) = nix::ifaddrs::getifaddrs() else {
        return Vec::new();
    };
    interfaces
        .filter_map(|iface| {
            let addr = iface.address?;
            let sock = addr.as_sockaddr_in()?;
            let netmask = iface.netmask?.as_sockaddr_in()?.ip();
            let prefix = u32::from(netmask).count_ones() as u8;
            Ipv4Network::new(sock.ip(), prefix).ok()
        })
        .collect()
}

fn enable_ip_forward() -> EngineResult<()> {
    std::fs::write("/proc/sys/net/ipv4/ip_forward", "1")
        .map_err(|e| EngineError::DriverError(format!("failed to enable ip_forward: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_detects_identical_ranges() {
        let a: Ipv4Network = "172.18.0.0/16".parse().unwrap();
        let b: Ipv4Network = "172.18.0.0/24".parse().unwrap();
        assert!(overlaps(&a, &b));
    }

    #[test]
    fn overlap_false_for_disjoint_ranges() {
        let a: Ipv4Network = "172.18.0.0/24".parse().unwrap();
        let b: Ipv4Network = "10.200.0.0/24".parse().unwrap();
        assert!(!overlaps(&a, &b));
    }
}
