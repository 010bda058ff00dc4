//! `vfs` driver: plain recursive directory copy per layer.
//!
//! The simplest possible storage backend — always available, no kernel
//! mount support required — used as the default in tests and as the final
//! fallback in the driver probe order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keel_shared::errors::{EngineError, EngineResult};

use super::{DriverStatus, StorageDriver};

#[derive(Debug)]
pub struct VfsDriver {
    root: PathBuf,
    mounts: Mutex<HashMap<String, (PathBuf, u64)>>,
}

impl VfsDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let _ = std::fs::create_dir_all(&root);
        Self {
            root,
            mounts: Mutex::new(HashMap::new()),
        }
    }

    fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dst)?;
        for entry in walkdir::WalkDir::new(src).min_depth(1) {
            let entry = entry?;
            let rel = entry.path().strip_prefix(src).unwrap();
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }
}

impl StorageDriver for VfsDriver {
    fn name(&self) -> &'static str {
        "vfs"
    }

    fn create(&self, id: &str, parent_chain: &[PathBuf]) -> EngineResult<()> {
        let dst = self.container_dir(id);
        std::fs::create_dir_all(&dst)?;
        for layer_dir in parent_chain {
            Self::copy_tree(layer_dir, &dst)?;
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> EngineResult<()> {
        let dir = self.container_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: Option<&str>) -> EngineResult<PathBuf> {
        let dir = self.container_dir(id);
        if !dir.exists() {
            return Err(EngineError::NotFound(format!("vfs mount {id}")));
        }
        let mut mounts = self.mounts.lock().unwrap();
        let entry = mounts.entry(id.to_string()).or_insert((dir.clone(), 0));
        entry.1 += 1;
        Ok(dir)
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
        let dir = self.container_dir(id);
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            builder
                .append_dir_all(".", &dir)
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
    use tempfile::TempDir;

    #[test]
    fn create_then_get_returns_populated_dir() {
        let tmp = TempDir::new().unwrap();
        let layer_dir = tmp.path().join("layer");
        std::fs::create_dir_all(&layer_dir).unwrap();
        std::fs::write(layer_dir.join("f"), b"x").unwrap();

        let driver = VfsDriver::new(tmp.path().join("driver"));
        driver.create("c1", &[layer_dir]).unwrap();
        let mount = driver.get("c1", None).unwrap();
        assert!(mount.join("f").exists());
    }

    #[test]
    fn get_put_refcounts() {
        let tmp = TempDir::new().unwrap();
        let driver = VfsDriver::new(tmp.path());
        driver.create("c1", &[]).unwrap();
        driver.get("c1", None).unwrap();
        driver.get("c1", None).unwrap();
        driver.put("c1").unwrap();
        assert_eq!(driver.mounts.lock().unwrap().get("c1").unwrap().1, 1);
        driver.put("c1").unwrap();
        assert!(driver.mounts.lock().unwrap().get("c1").is_none());
    }

    #[test]
    fn get_on_missing_mount_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let driver = VfsDriver::new(tmp.path());
        assert!(matches!(driver.get("nope", None), Err(EngineError::NotFound(_))));
    }
}
