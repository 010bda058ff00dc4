use clap::Args;
use tabled::{Table, Tabled};

use crate::cli::GlobalFlags;
use crate::wire::Container;

#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers, including exited ones.
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "CONTAINER ID")]
    id: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "IP")]
    ip: String,
}

pub async fn execute(args: PsArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let path = if args.all { "/containers/json?all=true" } else { "/containers/json" };
    let containers: Vec<Container> = client.get(path).await?;

    let rows: Vec<Row> = containers
        .into_iter()
        .map(|c| Row {
            id: c.id.chars().take(12).collect(),
            image: c.config.image,
            name: c.name,
            state: c.state,
            ip: c.network.ip_address.unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}
