use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::VersionResponse;

#[derive(Args, Debug)]
pub struct VersionArgs {}

pub async fn execute(_args: VersionArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    println!("Client:");
    println!(" Version: {}", env!("CARGO_PKG_VERSION"));

    let client = global.connect()?;
    match client.get::<VersionResponse>("/version").await {
        Ok(v) => {
            println!("Server:");
            println!(" Version: {}", v.version);
            println!(" API version: {}", v.api_version);
        }
        Err(e) => {
            eprintln!("Cannot connect to the daemon: {e}");
        }
    }
    Ok(())
}
