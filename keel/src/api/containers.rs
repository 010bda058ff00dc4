//! `/containers/*` handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use keel_shared::errors::EngineError;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::container::{Container, ContainerConfig, HostConfig};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn list(
    State(engine): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Container>> {
    Json(engine.list_containers(query.all))
}

#[derive(Deserialize)]
pub struct CreateQuery {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateContainerRequest {
    pub image: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default, rename = "HostConfig")]
    pub host_config: HostConfig,
}

#[derive(Serialize)]
pub struct CreateContainerResponse {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Warnings")]
    pub warnings: Vec<String>,
}

pub async fn create(
    State(engine): State<AppState>,
    Query(query): Query<CreateQuery>,
    Json(req): Json<CreateContainerRequest>,
) -> ApiResult<(StatusCode, Json<CreateContainerResponse>)> {
    let container = engine.create_container(query.name, &req.image, req.config, req.host_config)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateContainerResponse {
            id: container.id,
            warnings: Vec::new(),
        }),
    ))
}

pub async fn inspect(State(engine): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Container>> {
    Ok(Json(engine.inspect_container(&id)?))
}

pub async fn start(State(engine): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    engine.start_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct StopQuery {
    /// Seconds to wait for graceful exit before escalating to SIGKILL.
    pub t: Option<u64>,
}

pub async fn stop(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> ApiResult<StatusCode> {
    engine.stop_container(&id, query.t.map(Duration::from_secs)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restart(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> ApiResult<StatusCode> {
    engine.restart_container(&id, query.t.map(Duration::from_secs)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct KillQuery {
    pub signal: Option<String>,
}

pub async fn kill(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<KillQuery>,
) -> ApiResult<StatusCode> {
    let signal = parse_signal(query.signal.as_deref().unwrap_or("SIGKILL"))?;
    engine.kill_container(&id, signal)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause(State(engine): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    engine.pause_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unpause(State(engine): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    engine.unpause_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct WaitResponse {
    #[serde(rename = "StatusCode")]
    status_code: i32,
}

pub async fn wait(State(engine): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<WaitResponse>> {
    let status_code = engine.wait_container(&id).await?;
    Ok(Json(WaitResponse { status_code }))
}

#[derive(Deserialize, Default)]
pub struct RemoveQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn remove(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult<StatusCode> {
    engine.remove_container(&id, query.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResizeQuery {
    pub h: u16,
    pub w: u16,
}

pub async fn resize(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResizeQuery>,
) -> ApiResult<StatusCode> {
    engine.resize_container(&id, query.h, query.w)?;
    Ok(StatusCode::OK)
}

/// Maps a signal name (`"SIGTERM"`, `"TERM"`) or number (`"15"`) to a
/// [`Signal`].
pub fn parse_signal(raw: &str) -> ApiResult<Signal> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number)
            .map_err(|_| ApiError::from(EngineError::InvalidArgument(format!("unknown signal {raw}"))));
    }
    let name = raw.trim_start_matches("SIG").to_uppercase();
    let signal = match name.as_str() {
        "TERM" => Signal::SIGTERM,
        "KILL" => Signal::SIGKILL,
        "INT" => Signal::SIGINT,
        "HUP" => Signal::SIGHUP,
        "QUIT" => Signal::SIGQUIT,
        "USR1" => Signal::SIGUSR1,
        "USR2" => Signal::SIGUSR2,
        "STOP" => Signal::SIGSTOP,
        "CONT" => Signal::SIGCONT,
        _ => return Err(ApiError::from(EngineError::InvalidArgument(format!("unknown signal {raw}")))),
    };
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_signal() {
        assert_eq!(parse_signal("9").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn parses_full_name() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
    }

    #[test]
    fn parses_bare_name() {
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn rejects_unknown_signal() {
        assert!(parse_signal("NOTASIGNAL").is_err());
        assert!(parse_signal("999").is_err());
    }
}
