use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Name or ID of the container(s) to start.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: StartArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for target in args.targets {
        match client.post_empty(&format!("/containers/{target}/start")).await {
            Ok(()) => println!("{target}"),
            Err(e) => {
                eprintln!("Error starting container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to start {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
