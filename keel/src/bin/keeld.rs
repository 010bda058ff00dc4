//! `keeld`: the container engine daemon.
//!
//! Boot sequence: parse flags/env into [`EngineOptions`], initialize
//! logging, run [`Engine::boot`] (storage probe, Graph/Repositories/
//! Container Store open, bridge boot, crash recovery), then open the API
//! socket(s) and serve until a shutdown signal arrives.

use std::path::PathBuf;

use clap::Parser;
use keel::config::EngineOptions;
use keel::{api, logging, Engine};
use keel_shared::constants::env;
use tokio::net::UnixListener;

/// Container engine daemon.
#[derive(Parser, Debug)]
#[command(author, version, about = "keel container engine daemon")]
struct Args {
    /// Daemon root directory.
    #[arg(long, env = env::HOME)]
    home: Option<PathBuf>,

    /// Also listen on this TCP address (e.g. `127.0.0.1:2375`), in addition
    /// to the default Unix socket.
    #[arg(long)]
    tcp: Option<String>,

    /// Keep running containers attached across this process's own restart
    /// instead of stopping them on shutdown.
    #[arg(long)]
    live_restore: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut options = EngineOptions::default();
    if let Some(home) = args.home {
        options = options.with_home_dir(home);
    }
    options.live_restore = args.live_restore;

    let layout = keel_shared::layout::DaemonLayout::new(&options.home_dir);
    let _log_guard = logging::init_logging_for(&layout)?;

    tracing::info!(home = %options.home_dir.display(), "booting keeld");
    let engine = Engine::boot(options).await?;
    let router = api::router(engine.clone());

    let socket_path = engine.layout.control_socket();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let unix_listener = UnixListener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "listening on unix socket");

    let tcp_router = router.clone();
    let tcp_server = args.tcp.map(|addr| {
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    tracing::info!(%addr, "listening on tcp");
                    if let Err(e) = axum::serve(listener, tcp_router).await {
                        tracing::error!(error = %e, "tcp server exited");
                    }
                }
                Err(e) => tracing::error!(%addr, error = %e, "failed to bind tcp listener"),
            }
        })
    });

    let unix_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(unix_listener, router).await {
            tracing::error!(error = %e, "unix socket server exited");
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining containers");
    engine.shutdown().await;

    unix_server.abort();
    if let Some(tcp_server) = tcp_server {
        tcp_server.abort();
    }
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Waits for SIGTERM or SIGINT (Ctrl-C). `SIGHUP` is deliberately not wired
/// to a reload here: there's no live-reloadable state beyond what's
/// already re-read from disk at boot.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
