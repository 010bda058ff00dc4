//! IP address bitmap allocator over a single bridge's CIDR. One allocator per bridge; the bridge's own address and the
//! broadcast address are reserved up front.

use std::sync::Mutex;

use ipnetwork::Ipv4Network;
use keel_shared::errors::{EngineError, EngineResult};

pub struct IpAllocator {
    network: Ipv4Network,
    /// bit i set => host offset i (relative to network address) is in use.
    bitmap: Mutex<Vec<bool>>,
}

impl IpAllocator {
    pub fn new(network: Ipv4Network) -> Self {
        let host_count = 1u64 << (32 - network.prefix());
        let mut bitmap = vec![false; host_count as usize];
        // Reserve network address, bridge address (first usable host) and
        // broadcast address.
        bitmap[0] = true;
        bitmap[1] = true;
        if let Some(last) = bitmap.last_mut() {
            *last = true;
        }
        Self {
            network,
            bitmap: Mutex::new(bitmap),
        }
    }

    pub fn bridge_address(&self) -> std::net::Ipv4Addr {
        offset_to_addr(self.network, 1)
    }

    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    /// Allocate the lowest free address; `NoAvailableIp` on exhaustion.
    pub fn allocate(&self) -> EngineResult<std::net::Ipv4Addr> {
        let mut bitmap = self.bitmap.lock().unwrap();
        let offset = bitmap
            .iter()
            .position(|&used| !used)
            .ok_or_else(|| EngineError::NoAvailableIp("address pool exhausted".into()))?;
        bitmap[offset] = true;
        Ok(offset_to_addr(self.network, offset as u32))
    }

    pub fn release(&self, addr: std::net::Ipv4Addr) {
        let Some(offset) = addr_to_offset(self.network, addr) else {
            return;
        };
        let mut bitmap = self.bitmap.lock().unwrap();
        if let Some(slot) = bitmap.get_mut(offset as usize) {
            *slot = false;
        }
    }
}

fn offset_to_addr(network: Ipv4Network, offset: u32) -> std::net::Ipv4Addr {
    let base: u32 = network.network().into();
    std::net::Ipv4Addr::from(base + offset)
}

fn addr_to_offset(network: Ipv4Network, addr: std::net::Ipv4Addr) -> Option<u32> {
    let base: u32 = network.network().into();
    let value: u32 = addr.into();
    value.checked_sub(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_skips_reserved_addresses() {
        let network: Ipv4Network = "10.200.0.0/29".parse().unwrap();
        let allocator = IpAllocator::new(network);
        let first = allocator.allocate().unwrap();
        assert_eq!(first, "10.200.0.2".parse::<std::net::Ipv4Addr>().unwrap());
    }

    #[test]
    fn allocate_then_release_reuses_slot() {
        let network: Ipv4Network = "10.200.0.0/29".parse().unwrap();
        let allocator = IpAllocator::new(network);
        let addr = allocator.allocate().unwrap();
        allocator.release(addr);
        let reused = allocator.allocate().unwrap();
        assert_eq!(addr, reused);
    }

    #[test]
    fn exhaustion_returns_no_available_ip() {
        let network: Ipv4Network = "10.200.0.0/30".parse().unwrap();
        let allocator = IpAllocator::new(network);
        // /30 has 4 addresses total: network, bridge, one host, broadcast.
        allocator.allocate().unwrap();
        assert!(matches!(allocator.allocate(), Err(EngineError::NoAvailableIp(_))));
    }
}
