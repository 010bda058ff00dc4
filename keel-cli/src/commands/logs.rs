use clap::Args;
use hyper::Method;
use serde::Deserialize;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Keep streaming new log lines after the backlog is printed.
    #[arg(short, long)]
    pub follow: bool,

    /// Name or ID of the container whose log to fetch.
    pub target: String,
}

#[derive(Deserialize)]
struct LogLine {
    log: String,
    stream: String,
}

pub async fn execute(args: LogsArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let path = if args.follow {
        format!("/containers/{}/logs?follow=true", args.target)
    } else {
        format!("/containers/{}/logs", args.target)
    };

    client
        .stream_lines(Method::GET, &path, |line| {
            if line.is_empty() {
                return;
            }
            match serde_json::from_str::<LogLine>(line) {
                Ok(record) if record.stream == "stderr" => eprintln!("{}", record.log),
                Ok(record) => println!("{}", record.log),
                Err(_) => println!("{line}"),
            }
        })
        .await?;
    Ok(())
}
