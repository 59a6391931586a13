// handlers/push.rs - POST /push

use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ErrorCode};
use crate::middleware::{forbid_read_only, master_key_required};
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::types::HttpMethod;

pub const PUSH_STATUS_ID_HEADER: &str = "X-Parse-Push-Status-Id";

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router.route(HttpMethod::Post, "/push", vec![master_key_required(), handler(handle_post)]);
    router
}

async fn handle_post(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    forbid_read_only(&req, "send push notifications")?;
    let push = req
        .ctx
        .push
        .as_ref()
        .ok_or_else(|| ApiError::new(ErrorCode::PushMisconfigured, "Push controller is not set"))?;

    let where_clause = query_condition(&req.body)?;
    let push_status_id = push.send_push(&req.body, &where_clause).await?;

    Ok(RouteResponse::json(json!({ "result": true })).with_header(PUSH_STATUS_ID_HEADER, push_status_id))
}

/// Installation query for a push body: an explicit `where` or a list of `channels`
fn query_condition(body: &Value) -> Result<Value, ApiError> {
    match (body.get("where"), body.get("channels")) {
        (Some(_), Some(_)) => Err(ApiError::new(
            ErrorCode::PushMisconfigured,
            "Channels and query can not be set at the same time.",
        )),
        (Some(where_clause), None) => Ok(where_clause.clone()),
        (None, Some(channels)) => Ok(json!({ "channels": { "$in": channels } })),
        (None, None) => Err(ApiError::new(
            ErrorCode::PushMisconfigured,
            "Sending a push requires either \"channels\" or a \"where\" query.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use crate::services::StorePushController;
    use crate::testing::TestContext;

    fn with_push() -> TestContext {
        let mut t = TestContext::new();
        t.ctx = t.ctx.clone().with_push(Arc::new(StorePushController::new(t.ctx.store.clone())));
        t
    }

    async fn send(t: &TestContext, body: Value, auth: Auth) -> Result<RouteResponse, ApiError> {
        let req = t.request(HttpMethod::Post, "/push").with_body(body).with_auth(auth);
        Ok(router()
            .try_route_request(HttpMethod::Post, "/push", req)
            .await?
            .unwrap_or_default())
    }

    #[test]
    fn test_query_condition() {
        assert_eq!(
            query_condition(&json!({ "channels": ["news"] })).unwrap(),
            json!({ "channels": { "$in": ["news"] } })
        );
        assert_eq!(
            query_condition(&json!({ "where": { "deviceType": "ios" } })).unwrap(),
            json!({ "deviceType": "ios" })
        );
        assert_eq!(query_condition(&json!({})).unwrap_err().code(), Some(115));
        assert_eq!(
            query_condition(&json!({ "where": {}, "channels": [] })).unwrap_err().code(),
            Some(115)
        );
    }

    #[tokio::test]
    async fn test_push_sets_status_header() {
        let t = with_push();
        let response = send(&t, json!({ "channels": ["news"], "data": { "alert": "hi" } }), Auth::master())
            .await
            .unwrap();
        assert_eq!(response.response, Some(json!({ "result": true })));
        let (name, id) = &response.headers[0];
        assert_eq!(name, PUSH_STATUS_ID_HEADER);
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn test_push_gating_and_configuration() {
        let t = TestContext::new();
        let body = json!({ "channels": ["news"] });
        assert_eq!(send(&t, body.clone(), Auth::nobody()).await.unwrap_err().status_code(), 403);
        assert_eq!(send(&t, body.clone(), Auth::read_only_master()).await.unwrap_err().code(), Some(119));
        assert_eq!(send(&t, body, Auth::master()).await.unwrap_err().code(), Some(115));
    }
}
