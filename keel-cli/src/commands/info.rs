use clap::Args;

use crate::cli::GlobalFlags;
use crate::wire::InfoResponse;

#[derive(Args, Debug)]
pub struct InfoArgs {}

pub async fn execute(_args: InfoArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let info: InfoResponse = client.get("/info").await?;

    println!("Containers: {}", info.containers);
    println!(" Running: {}", info.containers_running);
    println!("Images: {}", info.images);
    println!("Storage Driver: {}", info.storage_driver);
    println!("Server Version: {}", info.server_version);
    println!("ID: {}", info.id);
    Ok(())
}
