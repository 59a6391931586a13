use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::auth::{lookup_session, Auth};
use crate::context::AppContext;
use crate::error::ApiError;
use crate::router::RequestInfo;

pub const APPLICATION_ID_HEADER: &str = "x-parse-application-id";
pub const MASTER_KEY_HEADER: &str = "x-parse-master-key";
pub const SESSION_TOKEN_HEADER: &str = "x-parse-session-token";
pub const INSTALLATION_ID_HEADER: &str = "x-parse-installation-id";
pub const CLIENT_VERSION_HEADER: &str = "x-parse-client-version";

/// Extract client metadata from request headers
pub fn request_info(headers: &HeaderMap) -> RequestInfo {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    RequestInfo {
        app_id: get(APPLICATION_ID_HEADER),
        master_key: get(MASTER_KEY_HEADER),
        session_token: get(SESSION_TOKEN_HEADER),
        installation_id: get(INSTALLATION_ID_HEADER),
        client_version: get(CLIENT_VERSION_HEADER),
    }
}

/// Resolve the principal for a request: master key, read-only master key,
/// session token, or nobody
pub async fn resolve_auth(ctx: &AppContext, info: &RequestInfo) -> Result<Auth, ApiError> {
    let security = &ctx.config.security;

    if let Some(expected) = &security.app_id {
        if info.app_id.as_ref() != Some(expected) {
            warn!("Rejecting request with missing or unknown application id");
            return Err(ApiError::unauthorized("unauthorized"));
        }
    }

    if let Some(key) = &info.master_key {
        let auth = if *key == security.master_key {
            Auth::master()
        } else if security.read_only_master_key.as_ref() == Some(key) {
            Auth::read_only_master()
        } else {
            warn!("Rejecting request with invalid master key");
            return Err(ApiError::unauthorized("unauthorized"));
        };
        return Ok(auth.with_installation_id(info.installation_id.clone()));
    }

    if let Some(token) = &info.session_token {
        return match lookup_session(ctx, token).await? {
            Some(auth) => {
                debug!("Resolved session for user {:?}", auth.user_id());
                Ok(auth.with_installation_id(info.installation_id.clone()))
            }
            None => Err(ApiError::invalid_session_token("Invalid session token")),
        };
    }

    Ok(Auth::nobody().with_installation_id(info.installation_id.clone()))
}
