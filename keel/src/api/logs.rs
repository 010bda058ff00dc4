//! `GET /containers/{id}/logs`: the on-disk journal, streamed
//! as newline-delimited JSON, optionally followed by the live tail.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::error::ApiResult;
use super::state::AppState;

#[derive(Deserialize, Default)]
pub struct LogsQuery {
    #[serde(default)]
    pub follow: bool,
}

pub async fn logs(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    let backlog = engine.container_logs(&id)?;
    let live = if query.follow {
        engine.attach_container(&id, false).ok().map(|h| h.output)
    } else {
        None
    };

    let stream = async_stream::stream! {
        for record in backlog {
            if let Ok(mut bytes) = serde_json::to_vec(&record) {
                bytes.push(b'\n');
                yield Ok::<_, std::io::Error>(bytes);
            }
        }
        if let Some(mut receiver) = live {
            while let Ok((stream, line)) = receiver.recv().await {
                let record = serde_json::json!({ "log": line, "stream": stream, "time": chrono::Utc::now() });
                yield Ok(format!("{record}\n").into_bytes());
            }
        }
    };

    Ok(Response::builder()
        .header("Content-Type", "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap())
}
