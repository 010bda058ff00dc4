use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct RmiArgs {
    /// Image reference(s) to remove, e.g. `alpine:3.19`.
    #[arg(required = true, num_args = 1..)]
    pub images: Vec<String>,
}

pub async fn execute(args: RmiArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut errors = Vec::new();
    for image in args.images {
        match client.delete(&format!("/images/{image}")).await {
            Ok(()) => println!("Untagged: {image}"),
            Err(e) => {
                eprintln!("Error removing image '{image}': {e}");
                errors.push(image);
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Failed to remove {} image(s): {}", errors.len(), errors.join(", "));
    }
    Ok(())
}
