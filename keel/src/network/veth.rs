//! veth pair creation and namespace plumbing via `rtnetlink`: one end stays on the host, attached to the bridge; the other
//! is moved into the container's net namespace and renamed `eth0`.

use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use futures::stream::TryStreamExt;
use keel_shared::errors::{EngineError, EngineResult};
use rtnetlink::{new_connection, Handle};

pub struct VethPair {
    pub host_side: String,
    pub container_side: String,
}

/// Thin wrapper around an `rtnetlink::Handle`, opened once per network
/// driver instance and reused for every container's veth setup.
pub struct NetlinkClient {
    handle: Handle,
}

impl NetlinkClient {
    pub fn connect() -> EngineResult<Self> {
        let (connection, handle, _) = new_connection()
            .map_err(|e| EngineError::DriverError(format!("rtnetlink connect failed: {e}")))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    pub async fn ensure_bridge(&self, name: &str) -> EngineResult<u32> {
        if let Some(index) = self.link_index(name).await? {
            return Ok(index);
        }
        self.handle
            .link()
            .add()
            .bridge(name.to_string())
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("bridge create failed: {e}")))?;
        self.set_link_up(name).await?;
        self.link_index(name)
            .await?
            .ok_or_else(|| EngineError::DriverError(format!("bridge {name} missing after create")))
    }

    pub async fn link_index(&self, name: &str) -> EngineResult<Option<u32>> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        match links.try_next().await {
            Ok(Some(link)) => Ok(Some(link.header.index)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    pub async fn set_link_up(&self, name: &str) -> EngineResult<()> {
        let index = self
            .link_index(name)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("link {name}")))?;
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("set link up failed: {e}")))
    }

    pub async fn add_addr(&self, link_name: &str, address: Ipv4Addr, prefix: u8) -> EngineResult<()> {
        let index = self
            .link_index(link_name)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("link {link_name}")))?;
        self.handle
            .address()
            .add(index, address.into(), prefix)
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("address add failed: {e}")))
    }

    /// Create a veth pair, attach `host_side` to `bridge`, and move
    /// `container_side` into the net namespace identified by `netns_fd`.
    pub async fn create_veth_pair(
        &self,
        pair: &VethPair,
        bridge: &str,
        netns_fd: RawFd,
    ) -> EngineResult<()> {
        self.handle
            .link()
            .add()
            .veth(pair.host_side.clone(), pair.container_side.clone())
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("veth create failed: {e}")))?;

        let bridge_index = self
            .link_index(bridge)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("bridge {bridge}")))?;
        let host_index = self
            .link_index(&pair.host_side)
            .await?
            .ok_or_else(|| EngineError::DriverError("host veth end missing after create".into()))?;

        self.handle
            .link()
            .set(host_index)
            .master(bridge_index)
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("attach to bridge failed: {e}")))?;
        self.set_link_up(&pair.host_side).await?;

        let container_index = self
            .link_index(&pair.container_side)
            .await?
            .ok_or_else(|| EngineError::DriverError("container veth end missing after create".into()))?;
        self.handle
            .link()
            .set(container_index)
            .setns_by_fd(netns_fd)
            .execute()
            .await
            .map_err(|e| EngineError::DriverError(format!("move veth into netns failed: {e}")))
    }

    pub async fn remove_link(&self, name: &str) -> EngineResult<()> {
        if let Some(index) = self.link_index(name).await? {
            let _ = self.handle.link().del(index).execute().await;
        }
        Ok(())
    }
}

/// Finish configuring `eth0` from inside the container's own network
/// namespace: bring the link up, assign its address, and point the
/// default route at the bridge. `create_veth_pair` already moved the link
/// there, so the host-side `NetlinkClient::handle` can no longer see it by
/// index — `rtnetlink::Handle::route()`/`address()` act on whatever
/// namespace the calling thread currently belongs to, and `setns` only
/// affects the calling thread, so all of this runs in a dedicated,
/// short-lived OS thread that joins the namespace, opens its own netlink
/// connection, and exits, leaving the async runtime's own threads
/// untouched.
pub fn configure_container_interface(
    netns_fd: RawFd,
    link_name: &str,
    address: Ipv4Addr,
    prefix: u8,
    bridge_ip: Ipv4Addr,
) -> EngineResult<()> {
    use nix::sched::{setns, CloneFlags};
    use std::os::fd::BorrowedFd;

    let link_name = link_name.to_string();
    std::thread::spawn(move || -> EngineResult<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(netns_fd) };
        setns(borrowed, CloneFlags::CLONE_NEWNET)
            .map_err(|e| EngineError::DriverError(format!("setns into container netns failed: {e}")))?;

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::DriverError(format!("failed to build netns runtime: {e}")))?;
        rt.block_on(async move {
            let (connection, handle, _) = new_connection().map_err(|e| {
                EngineError::DriverError(format!("rtnetlink connect in netns failed: {e}"))
            })?;
            tokio::spawn(connection);
            let client = NetlinkClient { handle };

            client.set_link_up(&link_name).await?;
            client.add_addr(&link_name, address, prefix).await?;
            client
                .handle
                .route()
                .add()
                .v4()
                .gateway(bridge_ip)
                .execute()
                .await
                .map_err(|e| EngineError::DriverError(format!("default route add failed: {e}")))
        })
    })
    .join()
    .map_err(|_| EngineError::DriverError("interface setup thread panicked".into()))?
}
