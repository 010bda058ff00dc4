//! Daemon configuration: defaults, environment overrides, CLI flags.
//!
//! A plain data struct with a `Default` impl reading environment
//! variables, constructed once at boot and threaded through every
//! component that needs it.

use std::path::PathBuf;

use keel_shared::constants::{env, network};

/// Storage driver selection order probed at boot; first one that
/// initializes successfully wins.
pub const DEFAULT_DRIVER_PROBE_ORDER: &[&str] = &["overlay", "vfs"];

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Daemon root directory (`<root>/` in the external interfaces tree).
    pub home_dir: PathBuf,
    /// Storage drivers to probe, in order.
    pub driver_probe_order: Vec<String>,
    /// Registries consulted for unqualified image references, tried in order.
    pub registries: Vec<String>,
    /// Bridge device name.
    pub bridge_name: String,
    /// Candidate CIDR ranges for the bridge, probed in order.
    pub candidate_cidrs: Vec<String>,
    /// Whether inter-container communication is allowed by default.
    pub icc_enabled: bool,
    /// Keep running containers alive across a daemon restart instead of
    /// stopping them (the `live-restore` boot option).
    pub live_restore: bool,
    /// Graceful shutdown timeout applied to every running container.
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let home_dir = std::env::var_os(env::HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/keel"));

        Self {
            home_dir,
            driver_probe_order: DEFAULT_DRIVER_PROBE_ORDER
                .iter()
                .map(|s| s.to_string())
                .collect(),
            registries: vec!["registry-1.docker.io".to_string()],
            bridge_name: network::BRIDGE_NAME.to_string(),
            candidate_cidrs: network::CANDIDATE_CIDRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            icc_enabled: true,
            live_restore: false,
            shutdown_timeout_secs: 10,
        }
    }
}

impl EngineOptions {
    pub fn with_home_dir(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = home_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_pick_up_driver_probe_order() {
        let opts = EngineOptions::default();
        assert_eq!(opts.driver_probe_order, vec!["overlay", "vfs"]);
        assert!(opts.icc_enabled);
    }

    #[test]
    fn with_home_dir_overrides_default() {
        let opts = EngineOptions::default().with_home_dir("/tmp/keel-test");
        assert_eq!(opts.home_dir, PathBuf::from("/tmp/keel-test"));
    }
}
