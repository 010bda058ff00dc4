use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Kill the container first if it is still running.
    #[arg(short, long)]
    pub force: bool,

    /// Name or ID of the container(s) to remove.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: RmArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for target in args.targets {
        let path = if args.force {
            format!("/containers/{target}?force=true")
        } else {
            format!("/containers/{target}")
        };
        match client.delete(&path).await {
            Ok(()) => println!("{target}"),
            Err(e) => {
                eprintln!("Error removing container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to remove {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
