use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use tracing::warn;

use crate::router::RouteResponse;

/// Turn a handler result into an HTTP response.
///
/// Text bodies win over JSON; a location without a JSON body gets the
/// conventional redirect text. `Location` and custom headers are applied to
/// every variant.
pub fn render(result: RouteResponse) -> Response {
    let status = result.status.unwrap_or(StatusCode::OK);

    let mut response = match (&result.text, &result.location, result.response) {
        (Some(text), _, _) => (status, text.clone()).into_response(),
        (None, Some(location), None) => (status, format!("Found. Redirecting to {}", location)).into_response(),
        (None, _, body) => (status, Json(body.unwrap_or(Value::Null))).into_response(),
    };

    let headers = response.headers_mut();
    if let Some(location) = &result.location {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                headers.insert(header::LOCATION, value);
            }
            Err(_) => warn!("Dropping unencodable Location header: {}", location),
        }
    }
    for (name, value) in &result.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping invalid response header {}", name),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_with_custom_status_and_headers() {
        let response = render(
            RouteResponse::json(json!({ "result": true }))
                .with_status(StatusCode::CREATED)
                .with_header("X-Parse-Push-Status-Id", "abc123"),
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-parse-push-status-id"], "abc123");
        assert_eq!(body_text(response).await, r#"{"result":true}"#);
    }

    #[tokio::test]
    async fn test_redirect_without_body() {
        let response = render(RouteResponse::redirect("https://example.com/next"));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/next");
        assert_eq!(body_text(response).await, "Found. Redirecting to https://example.com/next");
    }

    #[tokio::test]
    async fn test_location_with_body_keeps_json() {
        let response = render(
            RouteResponse::json(json!({ "objectId": "x1" }))
                .with_status(StatusCode::CREATED)
                .with_location("http://localhost/parse/users/x1"),
        );
        assert_eq!(response.headers()[header::LOCATION], "http://localhost/parse/users/x1");
        assert_eq!(body_text(response).await, r#"{"objectId":"x1"}"#);
    }

    #[tokio::test]
    async fn test_text_body() {
        let response = render(RouteResponse::text("plain"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "plain");
    }
}
