//! `keel attach`: hijack a running container's stdio.

use clap::Args;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Replay the on-disk journal before the live stream begins.
    #[arg(long)]
    pub logs: bool,

    /// Forward this process's stdin to the container.
    #[arg(long, default_value_t = true)]
    pub stdin: bool,

    /// Name or ID of the container to attach to.
    pub target: String,
}

pub async fn execute(args: AttachArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let path = format!(
        "/containers/{}/attach?stdin={}&logs={}",
        args.target, args.stdin, args.logs
    );
    let io = client.hijack(&path).await?;
    let (mut reader, mut writer) = tokio::io::split(io);

    let stdin_task = args.stdin.then(|| {
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if writer.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    });

    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout).await?;

    if let Some(task) = stdin_task {
        task.abort();
    }
    Ok(())
}
