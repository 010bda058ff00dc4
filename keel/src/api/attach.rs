//! `POST /containers/{id}/attach`: connection hijack to a running
//! container's live stdio. After responding with `101 Switching
//! Protocols`, the underlying byte-stream is handed to the Container
//! Runtime as a pair of reader/writer.
//!
//! Uses the same upgrade primitive axum's own websocket support does —
//! `hyper::upgrade::on` — rather than a bespoke raw-socket takeover.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keel_shared::errors::EngineError;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::container::AttachHandle;

use super::error::ApiError;
use super::state::AppState;

#[derive(Deserialize, Default)]
pub struct AttachQuery {
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub logs: bool,
}

pub async fn attach(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AttachQuery>,
    mut request: axum::extract::Request,
) -> Response {
    let handle = match engine.attach_container(&id, query.logs) {
        Ok(handle) => handle,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let on_upgrade = hyper::upgrade::on(&mut request);
    let stdin_enabled = query.stdin;
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                if let Err(e) = relay(upgraded, handle, stdin_enabled).await {
                    tracing::warn!(container = %id, error = %e, "attach stream ended");
                }
            }
            Err(e) => tracing::warn!(container = %id, error = %e, "attach upgrade failed"),
        }
    });

    match Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("Connection", "Upgrade")
        .header("Upgrade", "tcp")
        .body(Body::empty())
    {
        Ok(response) => response,
        Err(e) => ApiError::from(EngineError::Internal(e.to_string())).into_response(),
    }
}

/// Drain the on-disk backlog (if requested), then pump bytes both ways
/// until either side closes. Output is interleaved, line-buffered text —
/// unlike the framed multi-stream protocol a richer client might expect,
/// this keeps the wire format to "bytes in, bytes out."
async fn relay(upgraded: hyper::upgrade::Upgraded, mut handle: AttachHandle, stdin_enabled: bool) -> std::io::Result<()> {
    use hyper_util::rt::TokioIo;

    let mut io = TokioIo::new(upgraded);
    for record in handle.backlog.drain(..) {
        io.write_all(record.log.as_bytes()).await?;
        io.write_all(b"\n").await?;
    }

    let (mut reader, mut writer) = tokio::io::split(io);

    let stdin_task = stdin_enabled.then(|| {
        let stdin_tx = handle.stdin.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stdin_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    });

    while let Ok((_stream, line)) = handle.output.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    if let Some(task) = stdin_task {
        task.abort();
    }
    Ok(())
}
