use clap::Args;
use hyper::Method;
use serde::Deserialize;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference to pull, e.g. `alpine:3.19`.
    pub image: String,
}

#[derive(Deserialize)]
struct ProgressLine {
    id: Option<String>,
    status: String,
    #[serde(rename = "currentBytes")]
    current_bytes: Option<u64>,
    #[serde(rename = "totalBytes")]
    total_bytes: Option<u64>,
}

pub async fn execute(args: PullArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let (from_image, tag) = match args.image.split_once(':') {
        Some((image, tag)) => (image.to_string(), Some(tag.to_string())),
        None => (args.image.clone(), None),
    };
    let path = match tag {
        Some(tag) => format!("/images/create?fromImage={from_image}&tag={tag}"),
        None => format!("/images/create?fromImage={from_image}"),
    };

    client
        .stream_lines(Method::POST, &path, |line| {
            if line.is_empty() {
                return;
            }
            match serde_json::from_str::<ProgressLine>(line) {
                Ok(event) => match (event.current_bytes, event.total_bytes) {
                    (Some(cur), Some(total)) => println!(
                        "{}: {} ({cur}/{total})",
                        event.id.as_deref().unwrap_or("image"),
                        event.status
                    ),
                    _ => println!("{}: {}", event.id.as_deref().unwrap_or("image"), event.status),
                },
                Err(_) => println!("{line}"),
            }
        })
        .await?;
    Ok(())
}
