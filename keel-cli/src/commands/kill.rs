use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct KillArgs {
    /// Signal to send, by name or number (default SIGKILL).
    #[arg(short, long)]
    pub signal: Option<String>,

    /// Name or ID of the container(s) to signal.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: KillArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for target in args.targets {
        let path = match &args.signal {
            Some(s) => format!("/containers/{target}/kill?signal={s}"),
            None => format!("/containers/{target}/kill"),
        };
        match client.post_empty(&path).await {
            Ok(()) => println!("{target}"),
            Err(e) => {
                eprintln!("Error killing container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to kill {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
