//! cgroup v2 unified hierarchy, one directory per container under
//! `/sys/fs/cgroup/keel/<id>/`. Limits are applied as plain filesystem
//! writes before `fork`.

use std::fs;
use std::path::{Path, PathBuf};

use keel_shared::errors::{EngineError, EngineResult};

use crate::container::types::Resources;

const CGROUP_ROOT: &str = "/sys/fs/cgroup/keel";

pub struct CgroupHandle {
    dir: PathBuf,
}

impl CgroupHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create `<CGROUP_ROOT>/<id>/` and write the requested limits into it.
    /// Must be called before the container's init process is forked, so
    /// `cgroup.procs` can be written from within the pre_exec hook.
    pub fn create(id: &str, resources: &Resources) -> EngineResult<Self> {
        let dir = PathBuf::from(CGROUP_ROOT).join(id);
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::StartFailed(format!("failed to create cgroup {id}: {e}")))?;

        if let Some(bytes) = resources.memory_bytes {
            write_if_present(&dir.join("memory.max"), &bytes.to_string())?;
        }
        if let Some(shares) = resources.cpu_shares {
            // cpu.max expects "<quota> <period>"; shares map loosely onto
            // quota at a fixed 100ms period, matching Docker's translation.
            let quota = shares.max(1) * 1000;
            write_if_present(&dir.join("cpu.max"), &format!("{quota} 100000"))?;
        }
        if let Some(cpuset) = &resources.cpuset_cpus {
            write_if_present(&dir.join("cpuset.cpus"), cpuset)?;
        }
        if let Some(weight) = resources.blkio_weight {
            write_if_present(&dir.join("io.bfq.weight"), &weight.to_string())?;
        }

        Ok(Self { dir })
    }

    /// Add `pid` to this cgroup. Async-signal-safe enough to call from a
    /// `pre_exec` hook: a single `write()` to an already-open path.
    pub fn add_process(&self, pid: u32) -> std::io::Result<()> {
        fs::write(self.dir.join("cgroup.procs"), pid.to_string())
    }

    pub fn freeze(&self) -> EngineResult<()> {
        fs::write(self.dir.join("cgroup.freeze"), "1")
            .map_err(|e| EngineError::DriverError(format!("freeze failed: {e}")))
    }

    pub fn thaw(&self) -> EngineResult<()> {
        fs::write(self.dir.join("cgroup.freeze"), "0")
            .map_err(|e| EngineError::DriverError(format!("thaw failed: {e}")))
    }

    pub fn remove(&self) -> EngineResult<()> {
        if self.dir.exists() {
            fs::remove_dir(&self.dir)
                .map_err(|e| EngineError::DriverError(format!("cgroup removal failed: {e}")))?;
        }
        Ok(())
    }
}

fn write_if_present(path: &Path, value: &str) -> EngineResult<()> {
    fs::write(path, value)
        .map_err(|e| EngineError::StartFailed(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    // cgroupfs writes require a real cgroup v2 mount; exercised in CI with
    // privileged containers, not in a default sandboxed test run.
    #[test]
    #[ignore]
    fn create_applies_memory_limit() {
        let resources = Resources {
            memory_bytes: Some(64 * 1024 * 1024),
            ..Default::default()
        };
        let handle = CgroupHandle::create("test-container", &resources).unwrap();
        let content = std::fs::read_to_string(handle.dir().join("memory.max")).unwrap();
        assert_eq!(content.trim(), (64 * 1024 * 1024).to_string());
    }
}
