use axum::http::{HeaderMap, StatusCode};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::params::Params;
use crate::auth::Auth;
use crate::context::AppContext;
use crate::error::ApiError;
use crate::types::HttpMethod;

/// Client metadata taken from the `X-Parse-*` request headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    pub app_id: Option<String>,
    pub master_key: Option<String>,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
    pub client_version: Option<String>,
}

/// A request as seen by route handlers. Built per call and enriched with
/// params, auth and context before the handler pipeline runs.
#[derive(Clone)]
pub struct RouteRequest {
    pub method: HttpMethod,
    /// Path relative to the mount point
    pub path: String,
    /// Full URL as received, including the query string
    pub original_url: String,
    pub body: Value,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub params: Params,
    pub auth: Auth,
    pub info: RequestInfo,
    pub ctx: AppContext,
}

impl RouteRequest {
    pub fn new(ctx: AppContext, method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            original_url: path.clone(),
            path,
            body: Value::Object(Map::new()),
            query: HashMap::new(),
            headers: HeaderMap::new(),
            params: Params::default(),
            auth: Auth::nobody(),
            info: RequestInfo::default(),
            ctx,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_info(mut self, info: RequestInfo) -> Self {
        self.info = info;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }
}

/// Handler result: at least one of `response`, `location` or `text` must be set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteResponse {
    pub status: Option<StatusCode>,
    pub response: Option<Value>,
    pub location: Option<String>,
    pub text: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RouteResponse {
    pub fn json(response: Value) -> Self {
        Self {
            response: Some(response),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: Some(StatusCode::FOUND),
            location: Some(location.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn has_content(&self) -> bool {
        self.response.is_some() || self.location.is_some() || self.text.is_some()
    }
}

pub type StageResult = Result<Option<RouteResponse>, ApiError>;

/// One link of a handler pipeline. Guards resolve to `Ok(None)`; the value of
/// the last stage is the result of the whole pipeline.
pub type Stage = Arc<dyn Fn(Arc<RouteRequest>) -> BoxFuture<'static, StageResult> + Send + Sync>;

/// Wrap an async function producing a response as a terminal stage
pub fn handler<F, Fut>(f: F) -> Stage
where
    F: Fn(Arc<RouteRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RouteResponse, ApiError>> + Send + 'static,
{
    Arc::new(move |req: Arc<RouteRequest>| -> BoxFuture<'static, StageResult> {
        let fut = f(req);
        Box::pin(async move { fut.await.map(Some) })
    })
}

/// Wrap a synchronous predicate as a pipeline stage that either passes or short-circuits
pub fn guard<F>(f: F) -> Stage
where
    F: Fn(&RouteRequest) -> Result<(), ApiError> + Send + Sync + 'static,
{
    Arc::new(move |req: Arc<RouteRequest>| -> BoxFuture<'static, StageResult> {
        let outcome = f(&req).map(|_| None);
        Box::pin(futures::future::ready(outcome))
    })
}

/// Sequence stages: each starts only after the previous one resolved successfully
pub fn compose(mut stages: Vec<Stage>) -> Stage {
    if stages.len() == 1 {
        return stages.remove(0);
    }
    let stages: Arc<[Stage]> = stages.into();
    Arc::new(move |req: Arc<RouteRequest>| -> BoxFuture<'static, StageResult> {
        let start: BoxFuture<'static, StageResult> = Box::pin(futures::future::ready(Ok(None)));
        stages.iter().cloned().fold(start, |previous, stage| -> BoxFuture<'static, StageResult> {
            let req = req.clone();
            Box::pin(async move {
                previous.await?;
                stage(req).await
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use std::sync::Mutex;

    fn recording_stage(log: Arc<Mutex<Vec<&'static str>>>, name: &'static str, result: StageResult) -> Stage {
        Arc::new(move |_req: Arc<RouteRequest>| -> BoxFuture<'static, StageResult> {
            let log = log.clone();
            let result = result.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(name);
                result
            })
        })
    }

    #[tokio::test]
    async fn test_compose_runs_in_order_and_returns_last() {
        let log = Arc::new(Mutex::new(vec![]));
        let composed = compose(vec![
            recording_stage(log.clone(), "first", Ok(None)),
            recording_stage(log.clone(), "second", Ok(Some(RouteResponse::text("early")))),
            recording_stage(log.clone(), "third", Ok(Some(RouteResponse::text("last")))),
        ]);

        let req = Arc::new(TestContext::new().request(HttpMethod::Get, "/x"));
        let result = composed(req).await.unwrap();
        assert_eq!(result, Some(RouteResponse::text("last")));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_compose_short_circuits_on_error() {
        let log = Arc::new(Mutex::new(vec![]));
        let composed = compose(vec![
            recording_stage(log.clone(), "guard", Err(ApiError::unauthorized("no"))),
            recording_stage(log.clone(), "handler", Ok(Some(RouteResponse::text("never")))),
        ]);

        let req = Arc::new(TestContext::new().request(HttpMethod::Get, "/x"));
        assert!(composed(req).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["guard"]);
    }

    #[test]
    fn test_response_content() {
        assert!(!RouteResponse::default().has_content());
        assert!(RouteResponse::redirect("/elsewhere").has_content());
        assert_eq!(RouteResponse::redirect("/x").status, Some(StatusCode::FOUND));
    }
}
