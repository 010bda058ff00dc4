//! Pluggable storage driver: mounts a stack of layers as a writable rootfs.
//!
//! A trait object selected at boot by probing candidates in order —
//! dynamic dispatch over backends rather than a compile-time choice.

mod overlay;
mod vfs;

pub use overlay::OverlayDriver;
pub use vfs::VfsDriver;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use keel_shared::errors::EngineResult;

/// Diagnostic key/value pairs returned by `Status()`.
pub type DriverStatus = Vec<(String, String)>;

/// Contract every storage backend must satisfy.
///
/// `get`/`put` pair like acquire/release; the driver owns the mount-refcount
/// table, so `Get` is safe to call repeatedly and `Put` only unmounts once
/// the count reaches zero.
pub trait StorageDriver: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Materialize a new writable layer over `parent` (the layer chain,
    /// parent-first, as returned by `Graph::chain`).
    fn create(&self, id: &str, parent_chain: &[PathBuf]) -> EngineResult<()>;

    fn remove(&self, id: &str) -> EngineResult<()>;

    /// Returns the host path where the merged rootfs is visible.
    fn get(&self, id: &str, mount_label: Option<&str>) -> EngineResult<PathBuf>;

    /// Release one reference; unmounts when the refcount drops to zero.
    fn put(&self, id: &str) -> EngineResult<()>;

    /// Tar stream of the diff between `id` and `parent` (used by `commit`).
    fn diff(&self, id: &str) -> EngineResult<Vec<u8>>;

    fn status(&self) -> DriverStatus;
}

/// Probe `candidates` in order.
pub fn probe_driver(
    candidates: &[String],
    root: &Path,
) -> EngineResult<Box<dyn StorageDriver>> {
    for name in candidates {
        match name.as_str() {
            "overlay" => match OverlayDriver::probe(root) {
                Ok(driver) => return Ok(Box::new(driver)),
                Err(e) => tracing::warn!(driver = "overlay", error = %e, "driver unavailable"),
            },
            "vfs" => return Ok(Box::new(VfsDriver::new(root))),
            other => tracing::warn!(driver = other, "unknown storage driver, skipping"),
        }
    }
    Ok(Box::new(VfsDriver::new(root)))
}

pub(crate) fn mount_status_line(
    mounts: &HashMap<String, (PathBuf, u64)>,
) -> DriverStatus {
    vec![("Active mounts".to_string(), mounts.len().to_string())]
}
