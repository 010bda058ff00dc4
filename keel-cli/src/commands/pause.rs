use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct PauseArgs {
    /// Name or ID of the container(s) to pause.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: PauseArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for target in args.targets {
        match client.post_empty(&format!("/containers/{target}/pause")).await {
            Ok(()) => println!("{target}"),
            Err(e) => {
                eprintln!("Error pausing container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to pause {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
