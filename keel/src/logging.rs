//! Tracing initialization: a single call near the top of daemon boot,
//! parameterized by the daemon layout so log files can live under the
//! daemon root.

use keel_shared::constants::env;
use keel_shared::layout::DaemonLayout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initializes a global `tracing` subscriber writing to stderr and to a
/// rotating file under `<root>/log/keeld.log`. Returns a guard that must be
/// held for the lifetime of the process (dropping it flushes the writer).
pub fn init_logging_for(layout: &DaemonLayout) -> std::io::Result<WorkerGuard> {
    let log_dir = layout.root().join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "keeld.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = std::env::var(env::LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(non_blocking)
        .with_ansi(false)
        .finish();

    // Best-effort: a second call (e.g. in tests) should not panic.
    let _ = tracing::subscriber::set_global_default(subscriber);

    Ok(guard)
}
