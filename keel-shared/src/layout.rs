//! Daemon root directory layout.
//!
//! Mirrors the bit-exact file tree from the external interfaces section:
//! ```text
//! <root>/
//!   graph/<image-id>/{json,layersize,checksum,<driver tree>}
//!   repositories-<driver>
//!   containers/<container-id>/{config.json,hostconfig.json,state.json,...}
//!   volumes/<volume-id>/
//!   network/<bridge-name>.state
//!   <daemon>.pid
//! ```

use std::path::{Path, PathBuf};

/// Root-relative layout. Cheap to clone; all paths are computed, not cached.
#[derive(Clone, Debug)]
pub struct DaemonLayout {
    root: PathBuf,
}

impl DaemonLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph_dir(&self) -> PathBuf {
        self.root.join("graph")
    }

    pub fn image_dir(&self, image_id: &str) -> PathBuf {
        self.graph_dir().join(image_id)
    }

    pub fn repositories_file(&self, driver_name: &str) -> PathBuf {
        self.root.join(format!("repositories-{driver_name}"))
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.containers_dir().join(container_id)
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join("volumes")
    }

    pub fn volume_dir(&self, volume_id: &str) -> PathBuf {
        self.volumes_dir().join(volume_id)
    }

    pub fn network_dir(&self) -> PathBuf {
        self.root.join("network")
    }

    pub fn network_state_file(&self, bridge_name: &str) -> PathBuf {
        self.network_dir().join(format!("{bridge_name}.state"))
    }

    pub fn pid_file(&self, daemon_name: &str) -> PathBuf {
        self.root.join(format!("{daemon_name}.pid"))
    }

    pub fn control_socket(&self) -> PathBuf {
        self.root.join("keeld.sock")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create every top-level directory needed before the daemon starts.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.graph_dir())?;
        std::fs::create_dir_all(self.containers_dir())?;
        std::fs::create_dir_all(self.volumes_dir())?;
        std::fs::create_dir_all(self.network_dir())?;
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }
}

/// Per-container file paths within `containers/<id>/`.
#[derive(Clone, Debug)]
pub struct ContainerLayout {
    root: PathBuf,
}

impl ContainerLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_json(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn hostconfig_json(&self) -> PathBuf {
        self.root.join("hostconfig.json")
    }

    pub fn state_json(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn json_log(&self, container_id: &str) -> PathBuf {
        self.root.join(format!("{container_id}-json.log"))
    }

    pub fn hostname_file(&self) -> PathBuf {
        self.root.join("hostname")
    }

    pub fn hosts_file(&self) -> PathBuf {
        self.root.join("hosts")
    }

    pub fn resolv_conf(&self) -> PathBuf {
        self.root.join("resolv.conf")
    }

    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_layout_paths() {
        let layout = DaemonLayout::new("/var/lib/keel");
        assert_eq!(
            layout.image_dir("abc123"),
            PathBuf::from("/var/lib/keel/graph/abc123")
        );
        assert_eq!(
            layout.repositories_file("overlay"),
            PathBuf::from("/var/lib/keel/repositories-overlay")
        );
        assert_eq!(
            layout.network_state_file("keel0"),
            PathBuf::from("/var/lib/keel/network/keel0.state")
        );
    }

    #[test]
    fn container_layout_paths() {
        let layout = ContainerLayout::new("/var/lib/keel/containers/c1");
        assert_eq!(
            layout.json_log("c1"),
            PathBuf::from("/var/lib/keel/containers/c1/c1-json.log")
        );
    }

    #[test]
    fn prepare_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DaemonLayout::new(tmp.path());
        layout.prepare().unwrap();
        assert!(layout.graph_dir().is_dir());
        assert!(layout.containers_dir().is_dir());
        assert!(layout.network_dir().is_dir());
    }
}
