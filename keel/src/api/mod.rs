//! HTTP/JSON control plane.
//!
//! One `axum::Router` per API version, mounted under `/v{major}.{minor}`,
//! the single externally reachable surface wrapping
//! [`Engine`](crate::engine::Engine). Built on `axum` + `tower-http`, the
//! way the rest of this crate's async stack leans on `tokio`.

mod attach;
mod containers;
mod error;
mod events;
mod exec;
mod images;
mod logs;
mod state;
mod system;

use axum::routing::{delete, get, post};
use axum::Router;
use keel_shared::constants::{API_MAJOR, API_MINOR};
use tower_http::trace::TraceLayer;

use state::AppState;

pub use error::{ApiError, ApiResult};

/// Build the full router, versioned prefix included, ready to serve over a
/// Unix socket or TCP listener.
pub fn router(engine: AppState) -> Router {
    let prefix = format!("/v{API_MAJOR}.{API_MINOR}");

    let versioned = Router::new()
        .route("/containers/json", get(containers::list))
        .route("/containers/create", post(containers::create))
        .route("/containers/:id/json", get(containers::inspect))
        .route("/containers/:id/start", post(containers::start))
        .route("/containers/:id/stop", post(containers::stop))
        .route("/containers/:id/restart", post(containers::restart))
        .route("/containers/:id/kill", post(containers::kill))
        .route("/containers/:id/pause", post(containers::pause))
        .route("/containers/:id/unpause", post(containers::unpause))
        .route("/containers/:id/wait", post(containers::wait))
        .route("/containers/:id/resize", post(containers::resize))
        .route("/containers/:id/attach", post(attach::attach))
        .route("/containers/:id/logs", get(logs::logs))
        .route("/containers/:id/exec", post(exec::create))
        .route("/containers/:id", delete(containers::remove))
        .route("/exec/:id/start", post(exec::start))
        .route("/exec/:id/resize", post(exec::resize))
        .route("/exec/:id/json", get(exec::inspect))
        .route("/images/json", get(images::list))
        .route("/images/create", post(images::create))
        .route("/images/:name/push", post(images::push))
        .route("/images/:name", delete(images::remove))
        .route("/commit", post(images::commit))
        .route("/build", post(images::build))
        .route("/events", get(events::stream_events))
        .route("/info", get(system::info))
        .route("/version", get(system::version))
        .route("/system/df", get(system::disk_usage));

    Router::new()
        .nest(&prefix, versioned)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
