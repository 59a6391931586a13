use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use super::response::render;
use crate::error::ApiError;
use crate::router::{RouteRequest, RouteResponse, Stage};
use crate::types::HttpMethod;

const MASK: &str = "********";

/// Run a matched handler for a transport request and render the outcome.
///
/// Panics raised while building or polling the handler future are caught and
/// reported like any other failure.
pub async fn dispatch(handler: Stage, request: RouteRequest) -> Response {
    let method = request.method;
    let url = mask_sensitive_url(method, &request.original_url);
    let log_requests = request.ctx.config.logging.log_requests;

    if log_requests {
        info!("REQUEST for [{}] {}", method, url);
        debug!("REQUEST body: {}", redact_body(&request.body));
    }

    match run_handler(&handler, request).await {
        Ok(result) => {
            if log_requests {
                info!(
                    "RESPONSE from [{}] {}: status {}",
                    method,
                    url,
                    result.status.map(|s| s.as_u16()).unwrap_or(200)
                );
            }
            render(result)
        }
        Err(err) => {
            error!("Error generating response for [{}] {}: {:?}", method, url, err);
            err.into_response()
        }
    }
}

/// Invoke the handler pipeline and enforce the response contract
pub async fn run_handler(handler: &Stage, request: RouteRequest) -> Result<RouteResponse, ApiError> {
    let request = Arc::new(request);
    let future = catch_unwind(AssertUnwindSafe(|| handler(request))).map_err(|payload| {
        let message = panic_message(payload);
        error!("Error handling request: {}", message);
        ApiError::internal(message)
    })?;

    let outcome = AssertUnwindSafe(future).catch_unwind().await.map_err(|payload| {
        let message = panic_message(payload);
        error!("Error generating response: {}", message);
        ApiError::internal(message)
    })?;

    match outcome? {
        Some(result) if result.has_content() => Ok(result),
        _ => {
            error!("the handler did not include a \"response\" or a \"location\" field");
            Err(ApiError::internal("handler produced no response content"))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

/// Hide the `password` query parameter of GET login URLs
pub fn mask_sensitive_url(method: HttpMethod, original_url: &str) -> String {
    let should_mask = method == HttpMethod::Get && original_url.contains("/login") && !original_url.contains("classes");
    if !should_mask {
        return original_url.to_string();
    }

    let Ok(mut parsed) = Url::parse("http://localhost/").and_then(|base| base.join(original_url)) else {
        return original_url.to_string();
    };
    if parsed.query().is_none() {
        return original_url.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "password" { MASK.to_string() } else { value.into_owned() };
            (key.into_owned(), value)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);

    format!("{}?{}", parsed.path(), parsed.query().unwrap_or_default())
}

fn redact_body(body: &Value) -> Value {
    let mut body = body.clone();
    if let Some(password) = body.get_mut("password") {
        *password = json!(MASK);
    }
    body
}
