//! `/images/*` and `/commit` handlers.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::registry::ProgressEvent;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Serialize)]
pub struct ImageSummary {
    repository: String,
    tag: String,
    id: String,
}

pub async fn list(State(engine): State<AppState>) -> Json<Vec<ImageSummary>> {
    let images = engine
        .list_images()
        .into_iter()
        .map(|(repository, tag, id)| ImageSummary { repository, tag, id })
        .collect();
    Json(images)
}

#[derive(Deserialize)]
pub struct CreateQuery {
    #[serde(rename = "fromImage")]
    pub from_image: String,
    pub tag: Option<String>,
}

/// `POST /images/create`: pull, streaming progress as newline-delimited
/// JSON.
pub async fn create(State(engine): State<AppState>, Query(query): Query<CreateQuery>) -> ApiResult<Response> {
    let name = match query.tag {
        Some(tag) => format!("{}:{}", query.from_image, tag),
        None => query.from_image,
    };

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let sink = move |event: ProgressEvent| {
        let _ = tx.send(event);
    };

    let engine_for_pull = engine.clone();
    let pull_name = name.clone();
    let pull = tokio::spawn(async move { engine_for_pull.pull_image(&pull_name, &sink).await });

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match serde_json::to_vec(&event) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    yield Ok::<_, std::io::Error>(bytes);
                }
                Err(_) => continue,
            }
        }
        if let Ok(Err(e)) = pull.await {
            let line = serde_json::json!({ "error": e.to_string() });
            yield Ok(format!("{line}\n").into_bytes());
        }
    };

    Ok(Response::builder()
        .header("Content-Type", "application/json")
        .body(Body::from_stream(stream))
        .unwrap())
}

pub async fn remove(State(engine): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    engine.remove_image(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /images/{name}/push`: upload every layer of the tagged image,
/// streaming progress the same way `/images/create` streams a pull.
pub async fn push(State(engine): State<AppState>, Path(name): Path<String>) -> ApiResult<Response> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let sink = move |event: ProgressEvent| {
        let _ = tx.send(event);
    };

    let engine_for_push = engine.clone();
    let push_name = name.clone();
    let push = tokio::spawn(async move { engine_for_push.push_image(&push_name, &sink).await });

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match serde_json::to_vec(&event) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    yield Ok::<_, std::io::Error>(bytes);
                }
                Err(_) => continue,
            }
        }
        if let Ok(Err(e)) = push.await {
            let line = serde_json::json!({ "error": e.to_string() });
            yield Ok(format!("{line}\n").into_bytes());
        }
    };

    Ok(Response::builder()
        .header("Content-Type", "application/json")
        .body(Body::from_stream(stream))
        .unwrap())
}

#[derive(Deserialize)]
pub struct CommitQuery {
    pub container: String,
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub author: Option<String>,
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct CommitResponse {
    #[serde(rename = "Id")]
    id: String,
}

pub async fn commit(
    State(engine): State<AppState>,
    Query(query): Query<CommitQuery>,
) -> ApiResult<Json<CommitResponse>> {
    let repo_tag = query.repo.map(|repo| match &query.tag {
        Some(tag) => format!("{repo}:{tag}"),
        None => repo,
    });
    let id = engine.commit_container(&query.container, repo_tag.as_deref(), query.author, query.comment)?;
    Ok(Json(CommitResponse { id }))
}

/// `POST /build`: the Dockerfile build interpreter is an external client
/// of `commit`/`run`, not something this daemon implements. This endpoint
/// exists so such a client gets a real HTTP response instead of a 404.
pub async fn build() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({
            "message": "build is implemented by an external Dockerfile interpreter driving /commit and container Run; this engine does not interpret build contexts itself"
        })),
    )
}
