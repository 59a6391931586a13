// handlers/global_config.rs - GET/PUT /config

use serde_json::{json, Value};
use std::sync::Arc;

use crate::database::RecordUpdate;
use crate::error::ApiError;
use crate::filter::FindOptions;
use crate::middleware::{forbid_read_only, master_key_required};
use crate::router::{handler, PromiseRouter, RouteRequest, RouteResponse};
use crate::types::{is_valid_field_name, HttpMethod};

pub const GLOBAL_CONFIG_CLASS: &str = "_GlobalConfig";

/// The single global config document lives under this id
const GLOBAL_CONFIG_ID: &str = "1";

pub fn router() -> PromiseRouter {
    let mut router = PromiseRouter::new();
    router
        .route(HttpMethod::Get, "/config", vec![handler(get_global_config)])
        .route(
            HttpMethod::Put,
            "/config",
            vec![master_key_required(), handler(update_global_config)],
        );
    router
}

async fn get_global_config(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    let results = req
        .ctx
        .store
        .find(GLOBAL_CONFIG_CLASS, &json!({ "objectId": GLOBAL_CONFIG_ID }), &FindOptions::limit(1))
        .await?;

    let params = match results.as_slice() {
        [config] => config.get("params").cloned().unwrap_or_else(|| json!({})),
        _ => json!({}),
    };
    Ok(RouteResponse::json(json!({ "params": params })))
}

async fn update_global_config(req: Arc<RouteRequest>) -> Result<RouteResponse, ApiError> {
    forbid_read_only(&req, "update the config")?;
    let params = req
        .body
        .get("params")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::invalid_json("params must be an object"))?;

    if let Some(key) = params.keys().find(|key| !is_valid_field_name(key)) {
        return Err(ApiError::invalid_json(format!("Invalid field name: {}.", key)));
    }

    // Dotted keys so only the given params are replaced
    let update = params
        .iter()
        .fold(RecordUpdate::new(), |update, (key, value)| update.set(&format!("params.{}", key), value.clone()));

    req.ctx
        .store
        .upsert(GLOBAL_CONFIG_CLASS, &json!({ "objectId": GLOBAL_CONFIG_ID }), &update)
        .await?;
    Ok(RouteResponse::json(json!({ "result": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use crate::testing::TestContext;

    async fn call(req: RouteRequest) -> Result<Value, ApiError> {
        let (method, path) = (req.method, req.path.clone());
        let response = router().try_route_request(method, &path, req).await?;
        Ok(response.and_then(|r| r.response).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_empty_config() {
        let t = TestContext::new();
        let body = call(t.request(HttpMethod::Get, "/config")).await.unwrap();
        assert_eq!(body, json!({ "params": {} }));
    }

    #[tokio::test]
    async fn test_update_merges_params() {
        let t = TestContext::new();
        let put = |params: Value| {
            t.request(HttpMethod::Put, "/config")
                .with_body(json!({ "params": params }))
                .with_auth(Auth::master())
        };

        assert_eq!(call(put(json!({ "color": "red", "size": 2 }))).await.unwrap(), json!({ "result": true }));
        call(put(json!({ "color": "blue" }))).await.unwrap();

        let body = call(t.request(HttpMethod::Get, "/config")).await.unwrap();
        assert_eq!(body, json!({ "params": { "color": "blue", "size": 2 } }));
    }

    #[tokio::test]
    async fn test_update_rejects_malformed_param_names() {
        let t = TestContext::new();
        for key in ["a'b", "a.b", "a,b", "x}', '1'::jsonb, true) || jsonb_set(data, '{y", ""] {
            let mut params = serde_json::Map::new();
            params.insert(key.to_string(), json!(1));
            let req = t
                .request(HttpMethod::Put, "/config")
                .with_body(json!({ "params": params }))
                .with_auth(Auth::master());
            let err = call(req).await.unwrap_err();
            assert_eq!(err.code(), Some(107), "{}", key);
            assert_eq!(err.to_string(), format!("Invalid field name: {}.", key));
        }

        // Nothing was written
        let body = call(t.request(HttpMethod::Get, "/config")).await.unwrap();
        assert_eq!(body, json!({ "params": {} }));
    }

    #[tokio::test]
    async fn test_update_gating() {
        let t = TestContext::new();
        let body = json!({ "params": { "color": "red" } });

        let anonymous = t.request(HttpMethod::Put, "/config").with_body(body.clone());
        assert_eq!(call(anonymous).await.unwrap_err().status_code(), 403);

        let read_only = t
            .request(HttpMethod::Put, "/config")
            .with_body(body)
            .with_auth(Auth::read_only_master());
        let err = call(read_only).await.unwrap_err();
        assert_eq!(err.code(), Some(119));
        assert_eq!(err.to_string(), "read-only masterKey isn't allowed to update the config.");
    }
}
