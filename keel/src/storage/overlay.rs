//! `overlay` driver: Linux `overlay` filesystem mount, multiple lowerdirs
//! joined with `:`, one upperdir/workdir pair per container.
//!
//! Refcounting follows an acquire/release pattern backed by an internal
//! mount table: `Get` bumps a reference and returns the merged path,
//! `Put` drops one and unmounts at zero.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use keel_shared::errors::{EngineError, EngineResult};
use nix::mount::{mount, umount, MsFlags};

use super::{DriverStatus, StorageDriver};

#[derive(Debug)]
pub struct OverlayDriver {
    root: PathBuf,
    mounts: Mutex<HashMap<String, (PathBuf, u64)>>,
}

impl OverlayDriver {
    /// Probe whether overlayfs is usable on this host by attempting a
    /// throwaway mount; used by `probe_driver`'s "first working wins".
    pub fn probe(root: &std::path::Path) -> EngineResult<Self> {
        std::fs::create_dir_all(root)?;
        let probe_dir = root.join(".probe");
        let lower = probe_dir.join("lower");
        let upper = probe_dir.join("upper");
        let work = probe_dir.join("work");
        let merged = probe_dir.join("merged");
        for dir in [&lower, &upper, &work, &merged] {
            std::fs::create_dir_all(dir)?;
        }

        let opts = format!(
            "lowerdir={},upperdir={},workdir={}",
            lower.display(),
            upper.display(),
            work.display()
        );
        let result = mount(
            Some("overlay"),
            &merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        );
        let _ = umount(&merged);
        let _ = std::fs::remove_dir_all(&probe_dir);

        result.map_err(|e| EngineError::DriverError(format!("overlay unsupported: {e}")))?;

        Ok(Self {
            root: root.to_path_buf(),
            mounts: Mutex::new(HashMap::new()),
        })
    }

    fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl StorageDriver for OverlayDriver {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn create(&self, id: &str, parent_chain: &[PathBuf]) -> EngineResult<()> {
        let base = self.container_dir(id);
        let upper = base.join("upper");
        let work = base.join("work");
        let merged = base.join("merged");
        for dir in [&upper, &work, &merged] {
            std::fs::create_dir_all(dir)?;
        }

        if parent_chain.is_empty() {
            return Ok(());
        }

        // overlay lowerdir order is top-first; our chain is parent-first,
        // so reverse it.
        let lowerdir = parent_chain
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let opts = format!(
            "lowerdir={lowerdir},upperdir={},workdir={}",
            upper.display(),
            work.display()
        );

        mount(
            Some("overlay"),
            &merged,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        )
        .map_err(|e| EngineError::DriverError(format!("overlay mount failed: {e}")))?;

        Ok(())
    }

    fn remove(&self, id: &str) -> EngineResult<()> {
        let base = self.container_dir(id);
        let merged = base.join("merged");
        if merged.exists() {
            let _ = umount(&merged);
        }
        if base.exists() {
            std::fs::remove_dir_all(base)?;
        }
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: Option<&str>) -> EngineResult<PathBuf> {
        let merged = self.container_dir(id).join("merged");
        if !merged.exists() {
            return Err(EngineError::NotFound(format!("overlay mount {id}")));
        }
        let mut mounts = self.mounts.lock().unwrap();
        let entry = mounts.entry(id.to_string()).or_insert((merged.clone(), 0));
        entry.1 += 1;
        Ok(merged)
    }

    fn put(&self, id: &str) -> EngineResult<()> {
        let mut mounts = self.mounts.lock().unwrap();
        if let Some(entry) = mounts.get_mut(id) {
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                mounts.remove(id);
            }
        }
        Ok(())
    }

    fn diff(&self, id: &str) -> EngineResult<Vec<u8>> {
        let upper = self.container_dir(id).join("upper");
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            builder
                .append_dir_all(".", &upper)
                .map_err(|e| EngineError::DriverError(e.to_string()))?;
            builder
                .finish()
                .map_err(|e| EngineError::DriverError(e.to_string()))?;
        }
        Ok(buf)
    }

    fn status(&self) -> DriverStatus {
        let mounts = self.mounts.lock().unwrap();
        super::mount_status_line(&mounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // overlay mounts require CAP_SYS_ADMIN; these are exercised in CI with
    // privileged containers, not in a default sandboxed test run.
    #[test]
    #[ignore]
    fn probe_detects_overlay_support() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = OverlayDriver::probe(tmp.path());
        assert!(result.is_ok());
    }
}
