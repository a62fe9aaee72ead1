use crate::{api::state::AppState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Store is reachable", body = [Health]),
        (status = 503, description = "Store is unreachable", body = [Health])
    ),
    tag= "health"
)]
/// Report build metadata and whether the store answers a ping. `OPTIONS`
/// gets the same status and `X-App` header without a body.
pub async fn health(method: Method, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let reachable = match state
        .store
        .ping()
        .instrument(info_span!("db.ping", db.operation = "PING"))
        .await
    {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping store: {}", err);
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if reachable { "ok" } else { "error" }.to_string(),
    };

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let headers = app_header(&health);

    if method == Method::GET {
        (status, headers, Json(health)).into_response()
    } else {
        (status, headers, Body::empty()).into_response()
    }
}

/// `X-App: name:version:short-hash`
fn app_header(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(..7).unwrap_or_default();
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{short_hash}", health.name, health.version).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }
    headers
}
