//! `keel exec`: run a command inside an already-running container.

use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Keep STDIN open even if not attached.
    #[arg(short, long)]
    pub interactive: bool,

    /// Allocate a pseudo-TTY.
    #[arg(short, long)]
    pub tty: bool,

    /// Name or ID of the running container to exec into.
    pub target: String,

    /// Command and arguments to run.
    #[arg(trailing_var_arg = true, required = true)]
    pub cmd: Vec<String>,
}

#[derive(Serialize)]
struct CreateExecRequest {
    #[serde(rename = "Cmd")]
    cmd: Vec<String>,
    #[serde(rename = "Tty")]
    tty: bool,
}

#[derive(Deserialize)]
struct CreateExecResponse {
    #[serde(rename = "Id")]
    id: String,
}

pub async fn execute(args: ExecArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let client = global.connect()?;
    let created: CreateExecResponse = client
        .post_json(
            &format!("/containers/{}/exec", args.target),
            &CreateExecRequest {
                cmd: args.cmd,
                tty: args.tty,
            },
        )
        .await?;

    let io = client.hijack(&format!("/exec/{}/start", created.id)).await?;
    let (mut reader, mut writer) = tokio::io::split(io);

    let stdin_task = args.interactive.then(|| {
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
