use clap::Args;
use tabled::{Table, Tabled};

use crate::cli::GlobalFlags;
use crate::wire::ImageSummary;

#[derive(Args, Debug)]
pub struct ImagesArgs {}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "REPOSITORY")]
    repository: String,
    #[tabled(rename = "TAG")]
    tag: String,
    #[tabled(rename = "IMAGE ID")]
    id: String,
}

pub async fn execute(_args: ImagesArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let images: Vec<ImageSummary> = client.get("/images/json").await?;

    let rows: Vec<Row> = images
        .into_iter()
        .map(|i| Row {
            repository: i.repository,
            tag: i.tag,
            id: i.id.chars().take(12).collect(),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}
