//! Global flags and the top-level command enum.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keel_shared::constants::env;

use crate::client::DaemonClient;
use crate::commands::*;

#[derive(Parser, Debug)]
#[command(name = "keel", author, version, about = "Command-line client for the keel container engine")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Daemon root directory; only consulted to locate the default Unix
    /// socket when `--host` is not given.
    #[arg(long, global = true, env = env::HOME)]
    pub home: Option<PathBuf>,

    /// Daemon endpoint: `unix:///path/to/keeld.sock` or `tcp://host:port`.
    #[arg(long, global = true, env = "KEEL_HOST")]
    pub host: Option<String>,
}

impl GlobalFlags {
    /// Resolve the configured endpoint into a client, defaulting to the
    /// Unix socket under `--home` (or `$KEEL_HOME`, or `/var/lib/keel`).
    pub fn connect(&self) -> anyhow::Result<DaemonClient> {
        let endpoint = match &self.host {
            Some(host) => host.clone(),
            None => {
                let home = self
                    .home
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("/var/lib/keel"));
                let socket = keel_shared::layout::DaemonLayout::new(home).control_socket();
                format!("unix://{}", socket.display())
            }
        };
        DaemonClient::new(&endpoint)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List containers.
    Ps(ps::PsArgs),
    /// Create a container without starting it.
    Create(create::CreateArgs),
    /// Start one or more containers.
    Start(start::StartArgs),
    /// Stop one or more running containers.
    Stop(stop::StopArgs),
    /// Restart one or more containers.
    Restart(restart::RestartArgs),
    /// Send a signal to a running container.
    Kill(kill::KillArgs),
    /// Pause a running container's process.
    Pause(pause::PauseArgs),
    /// Resume a paused container.
    Unpause(unpause::UnpauseArgs),
    /// Block until a container exits and print its exit code.
    Wait(wait::WaitArgs),
    /// Remove one or more containers.
    Rm(rm::RmArgs),
    /// Print detailed JSON about a container.
    Inspect(inspect::InspectArgs),
    /// Fetch a container's stdout/stderr log.
    Logs(logs::LogsArgs),
    /// Attach to a running container's stdio.
    Attach(attach::AttachArgs),
    /// Run a command inside an already-running container.
    Exec(exec::ExecArgs),
    /// Pull an image from a registry.
    Pull(pull::PullArgs),
    /// Push a tagged image to a registry.
    Push(push::PushArgs),
    /// List images known to the daemon.
    Images(images::ImagesArgs),
    /// Remove an image.
    Rmi(rmi::RmiArgs),
    /// Commit a container's filesystem as a new image.
    Commit(commit::CommitArgs),
    /// Print daemon-wide information.
    Info(info::InfoArgs),
    /// Print client and daemon API versions.
    Version(version::VersionArgs),
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Ps(args) => ps::execute(args, &cli.global).await,
        Command::Create(args) => create::execute(args, &cli.global).await,
        Command::Start(args) => start::execute(args, &cli.global).await,
        Command::Stop(args) => stop::execute(args, &cli.global).await,
        Command::Restart(args) => restart::execute(args, &cli.global).await,
        Command::Kill(args) => kill::execute(args, &cli.global).await,
        Command::Pause(args) => pause::execute(args, &cli.global).await,
        Command::Unpause(args) => unpause::execute(args, &cli.global).await,
        Command::Wait(args) => wait::execute(args, &cli.global).await,
        Command::Rm(args) => rm::execute(args, &cli.global).await,
        Command::Inspect(args) => inspect::execute(args, &cli.global).await,
        Command::Logs(args) => logs::execute(args, &cli.global).await,
        Command::Attach(args) => attach::execute(args, &cli.global).await,
        Command::Exec(args) => exec::execute(args, &cli.global).await,
        Command::Pull(args) => pull::execute(args, &cli.global).await,
        Command::Push(args) => push::execute(args, &cli.global).await,
        Command::Images(args) => images::execute(args, &cli.global).await,
        Command::Rmi(args) => rmi::execute(args, &cli.global).await,
        Command::Commit(args) => commit::execute(args, &cli.global).await,
        Command::Info(args) => info::execute(args, &cli.global).await,
        Command::Version(args) => version::execute(args, &cli.global).await,
    }
}
