//! `/info`, `/version`, `/system/df`.

use axum::extract::State;
use axum::Json;
use keel_shared::constants::{API_MAJOR, API_MINOR};
use serde::Serialize;

use crate::engine::DiskUsage;

use super::state::AppState;

#[derive(Serialize)]
pub struct InfoResponse {
    #[serde(rename = "ID")]
    id: String,
    containers: usize,
    containers_running: usize,
    images: usize,
    storage_driver: String,
    server_version: String,
}

pub async fn info(State(engine): State<AppState>) -> Json<InfoResponse> {
    let all = engine.list_containers(true);
    let running = all
        .iter()
        .filter(|c| c.state == crate::container::ContainerState::Running)
        .count();

    Json(InfoResponse {
        id: engine.layout.root().display().to_string(),
        containers: all.len(),
        containers_running: running,
        images: engine.list_images().len(),
        storage_driver: engine.storage.name().to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct VersionResponse {
    version: String,
    api_version: String,
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: format!("{API_MAJOR}.{API_MINOR}"),
    })
}

pub async fn disk_usage(State(engine): State<AppState>) -> Json<DiskUsage> {
    Json(engine.disk_usage())
}
