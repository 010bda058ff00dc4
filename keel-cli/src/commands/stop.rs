use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Seconds to wait for graceful exit before escalating to SIGKILL.
    #[arg(short = 't', long)]
    pub time: Option<u64>,

    /// Name or ID of the container(s) to stop.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: StopArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for target in args.targets {
        let path = match args.time {
            Some(t) => format!("/containers/{target}/stop?t={t}"),
            None => format!("/containers/{target}/stop"),
        };
        match client.post_empty(&path).await {
            Ok(()) => println!("{target}"),
            Err(e) => {
                eprintln!("Error stopping container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to stop {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
