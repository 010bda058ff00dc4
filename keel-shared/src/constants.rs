//! Constants shared across the engine, the execution driver's child
//! process, and the CLI.

/// API version prefix, e.g. `/v1.0/containers/json`.
pub const API_MAJOR: u32 = 1;
pub const API_MINOR: u32 = 0;

/// Default restart-policy backoff schedule (seconds), exponential with cap.
pub const RESTART_BACKOFF_INITIAL_SECS: u64 = 1;
pub const RESTART_BACKOFF_MAX_SECS: u64 = 60;

/// Default graceful-stop timeout in seconds before escalating to SIGKILL.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Journal rotation size cap, per container, in bytes.
pub const JOURNAL_ROTATE_BYTES: u64 = 16 * 1024 * 1024;

/// Per-client bounded queue length for the `/events` stream.
pub const EVENTS_QUEUE_CAPACITY: usize = 256;

pub mod env {
    /// Overrides the daemon root directory (default: `/var/lib/keel`).
    pub const HOME: &str = "KEEL_HOME";
    /// `tracing-subscriber` `EnvFilter` directive string.
    pub const LOG: &str = "KEEL_LOG";
    pub const HTTP_PROXY: &str = "HTTP_PROXY";
    pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
    pub const NO_PROXY: &str = "NO_PROXY";
    pub const TMPDIR: &str = "TMPDIR";
}

/// Network defaults for the host bridge.
pub mod network {
    /// Name of the host-wide bridge created on daemon boot.
    pub const BRIDGE_NAME: &str = "keel0";
    /// iptables comment used to tag and later reconcile keel-owned rules.
    pub const IPTABLES_COMMENT: &str = "keel-managed";
    /// Candidate RFC1918 ranges probed in order for the bridge CIDR.
    pub const CANDIDATE_CIDRS: &[&str] = &[
        "172.20.0.0/16",
        "172.21.0.0/16",
        "172.22.0.0/16",
        "10.88.0.0/16",
        "192.168.99.0/24",
    ];
    /// Lowest host port ever auto-assigned for `host-port=0` publications.
    pub const EPHEMERAL_PORT_FLOOR: u16 = 1025;
}
