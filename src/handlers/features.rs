// handlers/features.rs - GET /serverInfo

use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::master_key_required;
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::types::HttpMethod;

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router.route(
        HttpMethod::Get,
        "/serverInfo",
        vec![master_key_required(), handler(server_info)],
    );
    router
}

async fn server_info(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let has_push = req.ctx.push.is_some();
    let features = json!({
        "globalConfig": { "create": true, "read": true, "update": true, "delete": true },
        "push": {
            "immediatePush": has_push,
            "scheduledPush": false,
            "storedPushData": has_push,
            "pushAudiences": false,
            "localization": false,
        },
        "users": {
            "accountLockout": req.ctx.config.account_lockout.is_some(),
            "passwordPolicy": req.ctx.config.password_policy.is_some(),
            "emailVerification": req.ctx.config.email.verify_user_emails,
        },
        "aggregate": true,
        "purge": true,
    });

    Ok(RouteResponse::json(json!({
        "features": features,
        "serverVersion": env!("CARGO_PKG_VERSION"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use crate::config::AccountLockoutConfig;
    use crate::testing::TestContext;

    #[tokio::test]
    async fn test_server_info_reports_configuration() {
        let t = TestContext::with_config(|config| {
            config.account_lockout = Some(AccountLockoutConfig { threshold: 5, duration: 10 })
        });
        let req = t.request(HttpMethod::Get, "/serverInfo").with_auth(Auth::read_only_master());
        let body = router()
            .try_route_request(HttpMethod::Get, "/serverInfo", req)
            .await
            .unwrap()
            .and_then(|r| r.response)
            .unwrap();

        assert_eq!(body["features"]["users"]["accountLockout"], true);
        assert_eq!(body["features"]["push"]["immediatePush"], false);
        assert_eq!(body["serverVersion"], env!("CARGO_PKG_VERSION"));
    }
}
