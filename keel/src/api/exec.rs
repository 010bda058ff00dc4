//! `/containers/{id}/exec` and `/exec/*`: create a process inside an
//! already-running container's namespaces, then hijack the connection onto
//! its stdio the same way `/containers/{id}/attach` does.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keel_shared::errors::EngineError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::container::AttachHandle;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Deserialize)]
pub struct CreateExecRequest {
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
    #[serde(default, rename = "Env")]
    pub env: Vec<String>,
    #[serde(default, rename = "WorkingDir")]
    pub working_dir: Option<String>,
    #[serde(default, rename = "Tty")]
    pub tty: bool,
}

#[derive(Serialize)]
pub struct CreateExecResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

pub async fn create(
    State(engine): State<AppState>,
    Path(container_id): Path<String>,
    Json(req): Json<CreateExecRequest>,
) -> ApiResult<(StatusCode, Json<CreateExecResponse>)> {
    let id = engine.create_exec(&container_id, req.cmd, req.env, req.working_dir, req.tty)?;
    Ok((StatusCode::CREATED, Json(CreateExecResponse { id })))
}

pub async fn inspect(
    State(engine): State<AppState>,
    Path(exec_id): Path<String>,
) -> ApiResult<Json<crate::container::ExecSession>> {
    Ok(Json(engine.exec_inspect(&exec_id)?))
}

#[derive(Deserialize, Default)]
pub struct StartExecQuery {
    #[serde(default)]
    pub detach: bool,
}

/// `POST /exec/{id}/start`: hijack the connection, the same upgrade
/// primitive `/containers/{id}/attach` uses.
pub async fn start(
    State(engine): State<AppState>,
    Path(exec_id): Path<String>,
    Query(query): Query<StartExecQuery>,
    mut request: axum::extract::Request,
) -> Response {
    let handle = match engine.start_exec(&exec_id) {
        Ok(handle) => handle,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if query.detach {
        return StatusCode::NO_CONTENT.into_response();
    }

    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                if let Err(e) = relay(upgraded, handle).await {
                    tracing::warn!(exec = %exec_id, error = %e, "exec stream ended");
                }
            }
            Err(e) => tracing::warn!(exec = %exec_id, error = %e, "exec upgrade failed"),
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

async fn relay(upgraded: hyper::upgrade::Upgraded, mut handle: AttachHandle) -> std::io::Result<()> {
    use hyper_util::rt::TokioIo;

    let io = TokioIo::new(upgraded);
    let (mut reader, mut writer) = tokio::io::split(io);

    let stdin_tx = handle.stdin.clone();
    let stdin_task = tokio::spawn(async move {
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
    });

    while let Ok((_stream, line)) = handle.output.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    stdin_task.abort();
    Ok(())
}

#[derive(Deserialize)]
pub struct ExecResizeQuery {
    pub h: u16,
    pub w: u16,
}

pub async fn resize(
    State(engine): State<AppState>,
    Path(exec_id): Path<String>,
    Query(query): Query<ExecResizeQuery>,
) -> ApiResult<StatusCode> {
    engine.resize_exec(&exec_id, query.h, query.w)?;
    Ok(StatusCode::OK)
}
