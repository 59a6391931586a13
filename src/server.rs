//! HTTP wiring.
//!
//! axum only owns `/health`; everything else falls through to one handler that
//! strips the mount path, resolves auth from the `X-Parse-*` headers and hands
//! the request to the first matching route of the [`PromiseRouter`].

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

use crate::context::AppContext;
use crate::error::ApiError;
use crate::handlers::api_router;
use crate::middleware::{dispatch, request_info, resolve_auth};
use crate::router::{PromiseRouter, RouteRequest, Stage};
use crate::types::HttpMethod;

#[derive(Clone)]
struct AppState {
    ctx: AppContext,
    router: Arc<PromiseRouter>,
}

pub fn app(ctx: AppContext) -> Router {
    let state = AppState {
        ctx,
        router: Arc::new(api_router()),
    };

    Router::new()
        .route("/health", get(health))
        .fallback(handle_api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Response {
    match state.ctx.store.health_check().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => {
            error!("Health check failed: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// Path below the mount point, or `None` for requests outside it
fn strip_mount_path<'a>(mount_path: &str, path: &'a str) -> Option<&'a str> {
    let mount_path = mount_path.trim_end_matches('/');
    if mount_path.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(mount_path)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("invalid JSON body: {}", e)))
}

fn parse_query(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

async fn handle_api(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    match prepare_request(&state, &method, &uri, headers, &body).await {
        Ok((handler, request)) => dispatch(handler, request).await,
        Err(err) => {
            debug!("Rejected {} {}: {}", method, uri.path(), err);
            err.into_response()
        }
    }
}

async fn prepare_request(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: HeaderMap,
    body: &Bytes,
) -> Result<(Stage, RouteRequest), ApiError> {
    let not_found = || ApiError::RouteNotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    };

    let path = strip_mount_path(&state.ctx.config.server.mount_path, uri.path()).ok_or_else(not_found)?;
    let http_method: HttpMethod = method.as_str().parse().map_err(|_| not_found())?;

    let info = request_info(&headers);
    let auth = resolve_auth(&state.ctx, &info).await?;
    let matched = state.router.match_route(http_method, path).ok_or_else(not_found)?;

    let mut request = RouteRequest::new(state.ctx.clone(), http_method, path)
        .with_body(parse_body(body)?)
        .with_auth(auth)
        .with_info(info);
    request.original_url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    request.query = parse_query(uri);
    request.headers = headers;
    request.params = matched.params;

    Ok((matched.handler, request))
}
