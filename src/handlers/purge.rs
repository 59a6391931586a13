// handlers/purge.rs - DELETE /purge/:className

use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::database::StoreError;
use crate::error::{ApiError, ErrorCode};
use crate::middleware::{forbid_read_only, master_key_required};
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::types::HttpMethod;

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router.route(
        HttpMethod::Delete,
        "/purge/:className",
        vec![master_key_required(), handler(handle_purge)],
    );
    router
}

/// Remove every object of a class; purging an unknown class succeeds
async fn handle_purge(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    forbid_read_only(&req, "purge a schema")?;
    let class_name = req
        .param("className")
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidClassName, "invalid className"))?;

    match req.ctx.store.purge_collection(class_name).await {
        Ok(()) => info!("Purged class {}", class_name),
        Err(StoreError::ObjectNotFound) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(RouteResponse::json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use crate::database::Record;
    use crate::filter::FindOptions;
    use crate::testing::TestContext;

    async fn purge(t: &TestContext, path: &str, auth: Auth) -> Result<Option<RouteResponse>, ApiError> {
        let req = t.request(HttpMethod::Delete, path).with_auth(auth);
        router().try_route_request(HttpMethod::Delete, path, req).await
    }

    #[tokio::test]
    async fn test_purge_removes_objects() {
        let t = TestContext::new();
        let mut score = Record::new();
        score.insert("score".to_string(), json!(10));
        t.ctx.store.create("GameScore", score).await.unwrap();

        let response = purge(&t, "/purge/GameScore", Auth::master()).await.unwrap().unwrap();
        assert_eq!(response.response, Some(json!({})));
        let left = t
            .ctx
            .store
            .find("GameScore", &json!({}), &FindOptions::default())
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_purging_missing_class_succeeds() {
        let t = TestContext::new();
        assert!(purge(&t, "/purge/NeverCreated", Auth::master()).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_gating() {
        let t = TestContext::new();
        assert_eq!(purge(&t, "/purge/GameScore", Auth::nobody()).await.unwrap_err().status_code(), 403);
        assert_eq!(
            purge(&t, "/purge/GameScore", Auth::read_only_master()).await.unwrap_err().to_string(),
            "read-only masterKey isn't allowed to purge a schema."
        );
        assert_eq!(
            purge(&t, "/purge/9bad", Auth::master()).await.unwrap_err().code(),
            Some(103)
        );
    }
}
