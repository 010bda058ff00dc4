//! Global host-port reservation table.
//!
//! Tracks `(protocol, host_port)` pairs already handed out so two
//! containers can't race for the same port; the actual bind happens via
//! the DNAT rule in `iptables`, so this is bookkeeping, not a live socket.

use std::collections::HashSet;
use std::sync::Mutex;

use keel_shared::constants::network::EPHEMERAL_PORT_FLOOR;
use keel_shared::errors::{EngineError, EngineResult};

use crate::container::types::Protocol;

#[derive(Debug, Default)]
pub struct PortTable {
    reserved: Mutex<HashSet<(Protocol, u16)>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `requested_port`, or auto-pick the lowest free ephemeral
    /// port if `requested_port == 0`. Returns `PortInUse` on conflict.
    pub fn reserve(&self, protocol: Protocol, requested_port: u16) -> EngineResult<u16> {
        let mut reserved = self.reserved.lock().unwrap();

        if requested_port != 0 {
            if reserved.contains(&(protocol, requested_port)) {
                return Err(EngineError::PortInUse(format!(
                    "{requested_port}/{protocol:?}"
                )));
            }
            reserved.insert((protocol, requested_port));
            return Ok(requested_port);
        }

        for candidate in EPHEMERAL_PORT_FLOOR..=u16::MAX {
            if !reserved.contains(&(protocol, candidate)) {
                reserved.insert((protocol, candidate));
                return Ok(candidate);
            }
        }
        Err(EngineError::PortInUse("ephemeral port range exhausted".into()))
    }

    pub fn release(&self, protocol: Protocol, port: u16) {
        self.reserved.lock().unwrap().remove(&(protocol, port));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_specific_port_rejects_conflict() {
        let table = PortTable::new();
        table.reserve(Protocol::Tcp, 8080).unwrap();
        assert!(matches!(
            table.reserve(Protocol::Tcp, 8080),
            Err(EngineError::PortInUse(_))
        ));
        // different protocol, same port number: fine
        table.reserve(Protocol::Udp, 8080).unwrap();
    }

    #[test]
    fn reserve_zero_picks_ephemeral_port() {
        let table = PortTable::new();
        let port = table.reserve(Protocol::Tcp, 0).unwrap();
        assert!(port >= EPHEMERAL_PORT_FLOOR);
    }

    #[test]
    fn release_then_reserve_reuses_port() {
        let table = PortTable::new();
        table.reserve(Protocol::Tcp, 9000).unwrap();
        table.release(Protocol::Tcp, 9000);
        table.reserve(Protocol::Tcp, 9000).unwrap();
    }
}
