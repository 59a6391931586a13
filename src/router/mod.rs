//! Promise-style route table.
//!
//! Routes are kept in registration order and matched first-wins, so a
//! parameterised route registered before a literal one shadows it
//! (`GET /users/:objectId` before `GET /users/me` captures `objectId = "me"`).

pub mod params;
pub mod pattern;
pub mod request;

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::types::{HttpMethod, UnsupportedMethod};

pub use params::{validate_parameter, Params};
pub use pattern::PathPattern;
pub use request::{compose, guard, handler, RequestInfo, RouteRequest, RouteResponse, Stage, StageResult};

#[derive(Clone)]
pub struct Route {
    pub method: HttpMethod,
    pub pattern: PathPattern,
    pub handler: Stage,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// Result of a successful lookup
#[derive(Clone)]
pub struct RouteMatch {
    pub params: Params,
    pub handler: Stage,
}

#[derive(Clone, Default, Debug)]
pub struct PromiseRouter {
    routes: Vec<Route>,
}

impl PromiseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Several stages are chained into one sequential pipeline.
    pub fn route(&mut self, method: HttpMethod, path: &str, stages: Vec<Stage>) -> &mut Self {
        self.routes.push(Route {
            method,
            pattern: PathPattern::parse(path),
            handler: compose(stages),
        });
        self
    }

    /// Register a route from a method name; anything but GET/POST/PUT/DELETE is rejected
    pub fn route_method(&mut self, method: &str, path: &str, stages: Vec<Stage>) -> Result<&mut Self, UnsupportedMethod> {
        let method: HttpMethod = method.parse()?;
        Ok(self.route(method, path, stages))
    }

    /// Append another router's routes after this one's
    pub fn merge(&mut self, other: PromiseRouter) -> &mut Self {
        self.routes.extend(other.routes);
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First route, in registration order, whose method and pattern both match
    pub fn match_route(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| {
                route.pattern.matches(path).map(|captures| RouteMatch {
                    params: Params::from_captures(captures),
                    handler: route.handler.clone(),
                })
            })
    }

    /// Run the matching handler for an internally constructed request
    pub async fn try_route_request(
        &self,
        method: HttpMethod,
        path: &str,
        mut request: RouteRequest,
    ) -> Result<Option<RouteResponse>, ApiError> {
        let Some(matched) = self.match_route(method, path) else {
            return Err(ApiError::invalid_json(format!("cannot route {} {}", method, path)));
        };
        debug!("Routing {} {} internally", method, path);
        request.params = matched.params;
        (matched.handler)(Arc::new(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use serde_json::json;

    fn respond(label: &'static str) -> Stage {
        handler(move |req: Arc<RouteRequest>| async move {
            Ok(RouteResponse::json(json!({
                "route": label,
                "objectId": req.param("objectId"),
            })))
        })
    }

    #[test]
    fn test_first_match_wins() {
        let mut router = PromiseRouter::new();
        router
            .route(HttpMethod::Get, "/users/:objectId", vec![respond("by-id")])
            .route(HttpMethod::Get, "/users/me", vec![respond("me")]);

        let matched = router.match_route(HttpMethod::Get, "/users/me").unwrap();
        assert_eq!(matched.params.get("objectId"), Some("me"));
    }

    #[tokio::test]
    async fn test_registration_order_shadows_literal_route() {
        let mut router = PromiseRouter::new();
        router
            .route(HttpMethod::Get, "/users/:objectId", vec![respond("by-id")])
            .route(HttpMethod::Get, "/users/me", vec![respond("me")]);

        let t = TestContext::new();
        let result = router
            .try_route_request(HttpMethod::Get, "/users/me", t.request(HttpMethod::Get, "/users/me"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.response, Some(json!({ "route": "by-id", "objectId": "me" })));
    }

    #[test]
    fn test_invalid_param_is_dropped_not_rejected() {
        let mut router = PromiseRouter::new();
        router.route(HttpMethod::Get, "/users/:objectId", vec![respond("by-id")]);

        let matched = router.match_route(HttpMethod::Get, "/users/abc$%").unwrap();
        assert!(matched.params.contains("objectId"));
        assert_eq!(matched.params.get("objectId"), None);
    }

    #[test]
    fn test_method_must_match() {
        let mut router = PromiseRouter::new();
        router.route(HttpMethod::Post, "/login", vec![respond("login")]);
        assert!(router.match_route(HttpMethod::Get, "/login").is_none());
        assert!(router.match_route(HttpMethod::Post, "/login").is_some());
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut first = PromiseRouter::new();
        first.route(HttpMethod::Get, "/config", vec![respond("first")]);
        let mut second = PromiseRouter::new();
        second
            .route(HttpMethod::Get, "/config", vec![respond("second")])
            .route(HttpMethod::Get, "/health", vec![respond("health")]);

        first.merge(second);
        let described: Vec<String> = first.routes().iter().map(|r| format!("{:?}", r)).collect();
        assert_eq!(described, vec!["GET /config", "GET /config", "GET /health"]);
    }

    #[test]
    fn test_unsupported_method_fails_fast() {
        let mut router = PromiseRouter::new();
        let err = router.route_method("PATCH", "/users", vec![respond("x")]).unwrap_err();
        assert_eq!(err.to_string(), "cannot route method: PATCH");
        assert!(router.routes().is_empty());
    }

    #[tokio::test]
    async fn test_try_route_request_without_match() {
        let router = PromiseRouter::new();
        let t = TestContext::new();
        let err = router
            .try_route_request(HttpMethod::Get, "/nowhere", t.request(HttpMethod::Get, "/nowhere"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(107));
        assert_eq!(err.to_string(), "cannot route GET /nowhere");
    }
}
