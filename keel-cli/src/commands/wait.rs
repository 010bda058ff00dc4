use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::WaitResponse;

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Name or ID of the container(s) to wait on.
    #[arg(required = true, num_args = 1..)]
    pub targets: Vec<String>,
}

pub async fn execute(args: WaitArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;

    let mut last_error = None;
    for target in args.targets {
        match client
            .post_json::<_, WaitResponse>(&format!("/containers/{target}/wait"), &serde_json::Value::Null)
            .await
        {
            Ok(resp) => println!("{}", resp.status_code),
            Err(e) => {
                eprintln!("Error waiting on container '{target}': {e}");
                last_error = Some(target);
            }
        }
    }

    if let Some(target) = last_error {
        anyhow::bail!("failed waiting on container '{target}'");
    }
    Ok(())
}
