use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::Container;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Name or ID of the container(s) to inspect.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: InspectArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut containers = Vec::new();
    let mut errors = Vec::new();
    for target in args.targets {
        match client.get::<Container>(&format!("/containers/{target}/json")).await {
            Ok(container) => containers.push(container),
            Err(e) => {
                eprintln!("Error inspecting container '{target}': {e}");
                errors.push(target);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&containers)?);

    if !errors.is_empty() {
        anyhow::bail!("Failed to inspect {} container(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
